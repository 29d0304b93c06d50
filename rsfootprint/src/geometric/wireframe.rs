use geo::Coord;
use geojson::{Geometry, Value};
use serde::{Deserialize, Serialize};

use crate::error::WireframeError;

/// A 3D vertex of a building wireframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point3 { x, y, z }
    }

    /// Drop the elevation
    pub fn xy(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

impl From<(f64, f64, f64)> for Point3 {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Point3::new(x, y, z)
    }
}

/// One straight segment of a wireframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub start: Point3,
    pub end: Point3,
}

impl Edge {
    pub fn new(start: impl Into<Point3>, end: impl Into<Point3>) -> Self {
        Edge {
            start: start.into(),
            end: end.into(),
        }
    }

    /// True when both endpoints sit within `tolerance` of `elevation`.
    /// An edge with a single endpoint at that height is a wall, not a floor edge.
    pub fn lies_at(&self, elevation: f64, tolerance: f64) -> bool {
        (self.start.z - elevation).abs() <= tolerance && (self.end.z - elevation).abs() <= tolerance
    }
}

/// The full 3D edge set of one building: walls, roof and floor outlines.
///
/// Edge order carries no meaning. Adjacency between edges has to be
/// discovered from shared endpoints, never assumed from sequence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wireframe {
    edges: Vec<Edge>,
}

impl Wireframe {
    pub fn new(edges: Vec<Edge>) -> Self {
        Wireframe { edges }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every endpoint, two per edge, in edge order
    pub fn points(&self) -> impl Iterator<Item = &Point3> + '_ {
        self.edges.iter().flat_map(|e| [&e.start, &e.end])
    }

    /// Lowest and highest elevation, `None` for an empty wireframe
    pub fn elevation_range(&self) -> Option<(f64, f64)> {
        self.points().fold(None, |acc, p| match acc {
            None => Some((p.z, p.z)),
            Some((lo, hi)) => Some((lo.min(p.z), hi.max(p.z))),
        })
    }

    /// Read a wireframe from a GeoJSON `LineString` or `MultiLineString`.
    ///
    /// A line string with n positions contributes n - 1 consecutive edges.
    /// Every position must carry an elevation as its third ordinate.
    pub fn from_geojson_geometry(geometry: &Geometry) -> Result<Self, WireframeError> {
        let lines: Vec<&Vec<Vec<f64>>> = match &geometry.value {
            Value::LineString(line) => vec![line],
            Value::MultiLineString(lines) => lines.iter().collect(),
            other => {
                return Err(WireframeError::UnsupportedGeometry(
                    geometry_type_name(other).to_string(),
                ))
            }
        };

        let mut edges = Vec::new();
        let mut index = 0;
        for line in lines {
            let mut previous: Option<Point3> = None;
            for position in line {
                if position.len() < 3 {
                    return Err(WireframeError::MissingElevation {
                        index,
                        dimensions: position.len(),
                    });
                }
                let point = Point3::new(position[0], position[1], position[2]);
                if let Some(start) = previous {
                    edges.push(Edge::new(start, point));
                }
                previous = Some(point);
                index += 1;
            }
        }

        Ok(Wireframe::new(edges))
    }
}

impl FromIterator<Edge> for Wireframe {
    fn from_iter<I: IntoIterator<Item = Edge>>(iter: I) -> Self {
        Wireframe::new(iter.into_iter().collect())
    }
}

fn geometry_type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}
