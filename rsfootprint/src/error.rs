use thiserror::Error;

/// Reasons a single building's footprint could not be extracted.
///
/// None of these are fatal to a batch: the driver records them per building
/// and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    /// The wireframe holds no edges.
    #[error("wireframe has no edges")]
    EmptyInput,

    /// Fewer than three distinct ground-level points survived deduplication.
    #[error("insufficient ground points: need at least 3, got {found}")]
    InsufficientGroundPoints { found: usize },

    /// Every ground point lies on one line, so any polygon would have zero area.
    #[error("ground points are collinear, footprint would have zero area")]
    DegenerateGeometry,

    /// Tolerance must be finite and non-negative.
    #[error("invalid tolerance {0}: must be finite and non-negative")]
    InvalidTolerance(f64),
}

/// Problems met while reading a wireframe out of a GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireframeError {
    #[error("position {index} has no elevation (got {dimensions} ordinates)")]
    MissingElevation { index: usize, dimensions: usize },

    #[error("unsupported geometry type {0}, expected LineString or MultiLineString")]
    UnsupportedGeometry(String),

    #[error("feature has no geometry")]
    MissingGeometry,
}

/// Why a building in a batch produced no footprint
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildingError {
    #[error("could not read wireframe: {0}")]
    Read(#[from] WireframeError),

    #[error("could not extract footprint: {0}")]
    Extraction(#[from] ExtractionError),
}
