use geo::{BoundingRect, Coord, Polygon};
use serde::{Deserialize, Serialize};

#[cfg(feature = "proj")]
use anyhow::{Context, Result};
#[cfg(feature = "proj")]
use geo::MapCoords;
#[cfg(feature = "proj")]
use proj::Proj;

/// EPSG code of the web-map CRS footprints are usually handed over in
pub const WGS84_EPSG: i32 = 4326;

/// Common lon/lat CRSs: WGS84, ETRS89, NAD83, RGF93
const GEOGRAPHIC_EPSG: [i32; 4] = [4326, 4258, 4269, 4171];

/// CRS bookkeeping for a set of footprints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCore {
    /// EPSG code the coordinates are expressed in
    pub epsg: i32,
}

impl Default for GeoCore {
    fn default() -> Self {
        GeoCore::new(WGS84_EPSG)
    }
}

impl GeoCore {
    pub fn new(epsg: i32) -> Self {
        GeoCore { epsg }
    }

    pub fn get_epsg(&self) -> i32 {
        self.epsg
    }

    /// Coordinates are longitude/latitude degrees rather than projected units
    pub fn is_geographic(&self) -> bool {
        GEOGRAPHIC_EPSG.contains(&self.epsg)
    }

    /// Reproject a footprint polygon from this CRS into `to_epsg`
    #[cfg(feature = "proj")]
    pub fn reproject_polygon(&self, polygon: &Polygon<f64>, to_epsg: i32) -> Result<Polygon<f64>> {
        let transformer = Self::proj_between(self.epsg, to_epsg)?;
        polygon
            .try_map_coords(|coord| {
                let (x, y) = transformer.convert((coord.x, coord.y))?;
                Ok::<_, proj::ProjError>(Coord { x, y })
            })
            .context("Failed to reproject polygon")
    }

    #[cfg(feature = "proj")]
    fn proj_between(from_epsg: i32, to_epsg: i32) -> Result<Proj> {
        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);
        Proj::new_known_crs(&from_crs, &to_crs, None)
            .context("Failed to create Proj transformation")
    }
}

/// Axis-aligned extent of one or more footprints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box holding every polygon, `None` when there are none
    pub fn covering<'a>(polygons: impl IntoIterator<Item = &'a Polygon<f64>>) -> Option<Self> {
        polygons
            .into_iter()
            .filter_map(|p| p.bounding_rect())
            .map(|rect| BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
            .reduce(|a, b| a.union(&b))
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn center(&self) -> Coord<f64> {
        Coord {
            x: (self.min_x + self.max_x) / 2.0,
            y: (self.min_y + self.max_y) / 2.0,
        }
    }
}
