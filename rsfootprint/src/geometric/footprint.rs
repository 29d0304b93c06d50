//! Ground footprint extraction from a 3D building wireframe.
//!
//! The floor outline of a CityGML wireframe is the set of edges lying at the
//! lowest elevation of the building. When those edges close into exactly one
//! ring the ring is the footprint. Anything else (open chains, several rings,
//! dangling segments) falls back to the convex hull of the ground points and
//! the result is flagged as approximated.

use geo::orient::Direction;
use geo::{Area, Centroid, ConvexHull, Coord, LineString, MultiPoint, Orient, Point, Polygon};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::wireframe::{Edge, Wireframe};
use crate::error::ExtractionError;

/// Elevation tolerance used when the caller has no better idea
pub const DEFAULT_TOLERANCE: f64 = 0.5;

/// 2D distance under which two ground points count as the same vertex.
/// Near-exact, so it holds for projected metres and lon/lat degrees alike.
pub const DEFAULT_SNAP_DISTANCE: f64 = 1e-10;

/// Hulls at or below this area are treated as zero-area
const MIN_FOOTPRINT_AREA: f64 = 1e-10;

/// Knobs for a single extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Elevation band above ground level still counted as ground
    pub tolerance: f64,
    /// 2D distance under which two ground points are merged.
    /// Falls back to [`DEFAULT_SNAP_DISTANCE`] when unset.
    pub snap_distance: Option<f64>,
    /// When a wireframe has no ground edges at all, build the hull from
    /// every ground-level endpoint (feet of the walls included)
    pub loose_ground_points: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        ExtractionOptions {
            tolerance: DEFAULT_TOLERANCE,
            snap_distance: None,
            loose_ground_points: false,
        }
    }
}

impl ExtractionOptions {
    pub fn new(tolerance: f64) -> Self {
        ExtractionOptions {
            tolerance,
            ..Default::default()
        }
    }

    pub fn with_snap_distance(mut self, snap_distance: f64) -> Self {
        self.snap_distance = Some(snap_distance);
        self
    }

    pub fn with_loose_ground_points(mut self, enabled: bool) -> Self {
        self.loose_ground_points = enabled;
        self
    }

    /// Effective vertex merge distance
    pub fn snap(&self) -> f64 {
        self.snap_distance.unwrap_or(DEFAULT_SNAP_DISTANCE)
    }

    fn validate(&self) -> Result<(), ExtractionError> {
        for value in [self.tolerance, self.snap()] {
            if !value.is_finite() || value < 0.0 {
                return Err(ExtractionError::InvalidTolerance(value));
            }
        }
        Ok(())
    }
}

/// How the footprint polygon was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    /// Ground edges closed into a single ring
    Assembled,
    /// Convex hull of the ground points
    ConvexHull,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Assembled => "assembled",
            ExtractionMethod::ConvexHull => "convex_hull",
        }
    }
}

/// Non-fatal remarks attached to a successful extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advisory {
    /// The polygon approximates the base outline rather than reproducing it
    ApproximatedFootprint,
}

/// 2D base outline of one building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    /// Closed exterior ring, counter-clockwise, no interiors
    pub polygon: Polygon<f64>,
    /// Minimum elevation of the wireframe
    pub ground_level: f64,
    /// Highest elevation minus ground level
    pub height: f64,
    pub method: ExtractionMethod,
}

impl Footprint {
    pub fn is_approximated(&self) -> bool {
        self.method == ExtractionMethod::ConvexHull
    }

    pub fn advisory(&self) -> Option<Advisory> {
        self.is_approximated()
            .then_some(Advisory::ApproximatedFootprint)
    }

    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }

    pub fn centroid(&self) -> Option<Point<f64>> {
        self.polygon.centroid()
    }

    /// Distinct vertices, closing point excluded
    pub fn vertices(&self) -> &[Coord<f64>] {
        let coords = &self.polygon.exterior().0;
        &coords[..coords.len().saturating_sub(1)]
    }
}

/// Extract the ground footprint of `wireframe`, counting any endpoint within
/// `tolerance` of the lowest elevation as ground level.
pub fn extract_footprint(
    wireframe: &Wireframe,
    tolerance: f64,
) -> Result<Footprint, ExtractionError> {
    extract_footprint_with(wireframe, &ExtractionOptions::new(tolerance))
}

/// Same as [`extract_footprint`] with every option spelled out
pub fn extract_footprint_with(
    wireframe: &Wireframe,
    options: &ExtractionOptions,
) -> Result<Footprint, ExtractionError> {
    options.validate()?;

    let (ground_level, top) = wireframe
        .elevation_range()
        .ok_or(ExtractionError::EmptyInput)?;
    let tolerance = options.tolerance;
    let snap = options.snap();

    let mut graph = GroundGraph::default();
    let mut ground_edge_count = 0;
    for edge in ground_edges(wireframe, ground_level, tolerance) {
        graph.add_edge(edge.start.xy(), edge.end.xy(), snap);
        ground_edge_count += 1;
    }

    if ground_edge_count == 0 && options.loose_ground_points {
        for point in wireframe
            .points()
            .filter(|p| (p.z - ground_level).abs() <= tolerance)
        {
            graph.add_vertex(point.xy(), snap);
        }
    }

    debug!(
        "Ground level {:.2} (top {:.2}): {} ground edges, {} distinct points",
        ground_level,
        top,
        ground_edge_count,
        graph.vertices.len()
    );

    if graph.vertices.len() < 3 {
        return Err(ExtractionError::InsufficientGroundPoints {
            found: graph.vertices.len(),
        });
    }

    let hull = MultiPoint::from(graph.vertices.clone()).convex_hull();
    if hull.unsigned_area() <= MIN_FOOTPRINT_AREA {
        return Err(ExtractionError::DegenerateGeometry);
    }

    // An assembled ring is taken as walked; self-intersections are not checked
    let assembled = graph
        .assemble_ring()
        .map(|ring| Polygon::new(LineString::from(ring), vec![]));

    let (polygon, method) = match assembled {
        Some(polygon) => (polygon.orient(Direction::Default), ExtractionMethod::Assembled),
        None => {
            debug!(
                "Ground edges do not close into a single ring, using convex hull of {} points",
                graph.vertices.len()
            );
            (hull.orient(Direction::Default), ExtractionMethod::ConvexHull)
        }
    };

    Ok(Footprint {
        polygon,
        ground_level,
        height: top - ground_level,
        method,
    })
}

/// Edges with both endpoints within `tolerance` of `ground_level`
pub fn ground_edges(
    wireframe: &Wireframe,
    ground_level: f64,
    tolerance: f64,
) -> impl Iterator<Item = &Edge> + '_ {
    wireframe
        .edges()
        .iter()
        .filter(move |edge| edge.lies_at(ground_level, tolerance))
}

/// Undirected graph of projected ground edges over deduplicated vertices
#[derive(Debug, Default)]
struct GroundGraph {
    /// Distinct points in first-seen order
    vertices: Vec<Coord<f64>>,
    /// Distinct non-degenerate edges as vertex index pairs
    edges: Vec<(usize, usize)>,
}

impl GroundGraph {
    fn add_vertex(&mut self, coord: Coord<f64>, snap: f64) -> usize {
        match self
            .vertices
            .iter()
            .position(|v| (v.x - coord.x).hypot(v.y - coord.y) <= snap)
        {
            Some(index) => index,
            None => {
                self.vertices.push(coord);
                self.vertices.len() - 1
            }
        }
    }

    fn add_edge(&mut self, a: Coord<f64>, b: Coord<f64>, snap: f64) {
        let a = self.add_vertex(a, snap);
        let b = self.add_vertex(b, snap);
        if a == b {
            return;
        }
        let key = (a.min(b), a.max(b));
        if !self.edges.iter().any(|&(p, q)| (p.min(q), p.max(q)) == key) {
            self.edges.push((a, b));
        }
    }

    /// Walk the edges as one closed ring.
    ///
    /// Succeeds only when every vertex has exactly two neighbours and a single
    /// walk from the first edge visits all of them.
    fn assemble_ring(&self) -> Option<Vec<Coord<f64>>> {
        if self.edges.len() < 3 {
            return None;
        }

        let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); self.vertices.len()];
        for &(a, b) in &self.edges {
            neighbours[a].push(b);
            neighbours[b].push(a);
        }
        if neighbours.iter().any(|n| n.len() != 2) {
            return None;
        }

        let (start, first) = self.edges[0];
        let mut ring = vec![self.vertices[start]];
        let mut previous = start;
        let mut current = first;
        while current != start {
            ring.push(self.vertices[current]);
            let around = &neighbours[current];
            let next = if around[0] == previous {
                around[1]
            } else {
                around[0]
            };
            previous = current;
            current = next;
        }

        // Several disjoint rings leave vertices unvisited
        (ring.len() == self.vertices.len()).then_some(ring)
    }
}
