//! Ground footprints from 3D building wireframes.
//!
//! CityGML exports often describe a building as a `MultiLineString` of 3D
//! edges (walls, roof and floor outlines). [`geometric::footprint`] turns one
//! such wireframe into a 2D base polygon; [`geometric::building`] runs that
//! over a GeoJSON collection and reports per-building outcomes.

pub mod error;
pub mod geo_core;
pub mod geometric;

pub use error::{BuildingError, ExtractionError, WireframeError};
pub use geometric::building::{
    run_batch, BatchConfig, BatchReport, BatchSummary, BuildingCollection, BuildingOutcome,
    BuildingRecord,
};
pub use geometric::footprint::{
    extract_footprint, extract_footprint_with, Advisory, ExtractionMethod, ExtractionOptions,
    Footprint, DEFAULT_SNAP_DISTANCE, DEFAULT_TOLERANCE,
};
pub use geometric::wireframe::{Edge, Point3, Wireframe};
