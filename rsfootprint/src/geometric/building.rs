use anyhow::{Context, Result};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{BuildingError, WireframeError};
use crate::geo_core::{BoundingBox, GeoCore};
use crate::geometric::footprint::{
    extract_footprint_with, ExtractionMethod, ExtractionOptions, Footprint,
};
use crate::geometric::wireframe::Wireframe;

/// Snap distances from this size up are metre-scale, far too coarse for degrees
const GEOGRAPHIC_SNAP_WARNING: f64 = 1e-3;

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent} {msg}")
        .unwrap()
        .progress_chars("##-")
}

/// Settings for one batch run.
///
/// Input location is never global state: callers list candidate files here
/// and the first one that exists is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Candidate GeoJSON files, tried in order
    pub input_candidates: Vec<PathBuf>,
    /// Per-building extraction settings
    pub options: ExtractionOptions,
    /// CRS override for the input, otherwise read from the file
    pub set_crs: Option<i32>,
    /// Extract buildings on the rayon pool
    pub parallel: bool,
    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            input_candidates: Vec::new(),
            options: ExtractionOptions::default(),
            set_crs: None,
            parallel: true,
            show_progress: false,
        }
    }
}

impl BatchConfig {
    pub fn new<P: Into<PathBuf>>(input_candidates: impl IntoIterator<Item = P>) -> Self {
        BatchConfig {
            input_candidates: input_candidates.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    /// First candidate path that exists on disk
    pub fn resolve_input(&self) -> Result<&Path> {
        self.input_candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|path| path.exists())
            .with_context(|| {
                format!(
                    "None of the input candidates exist: {:?}",
                    self.input_candidates
                )
            })
    }
}

/// One building as read from the input, before extraction
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingRecord {
    /// Position in the input
    pub index: usize,
    /// Feature id, or its `gml_id` / `id` property
    pub id: Option<String>,
    /// Attributes carried through to the output untouched
    pub properties: Map<String, JsonValue>,
    /// Parsed wireframe, or why it could not be read
    pub wireframe: Result<Wireframe, WireframeError>,
}

impl BuildingRecord {
    /// Convert GeoJSON feature to BuildingRecord.
    /// Unreadable geometry is kept as an error on the record so the building
    /// still shows up in the batch report.
    pub fn from_feature(index: usize, feature: &Feature) -> Self {
        let properties = feature.properties.clone().unwrap_or_default();

        let id = match &feature.id {
            Some(Id::String(s)) => Some(s.clone()),
            Some(Id::Number(n)) => Some(n.to_string()),
            None => ["gml_id", "id"]
                .iter()
                .find_map(|key| properties.get(*key))
                .and_then(|value| match value {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
        };

        let wireframe = feature
            .geometry
            .as_ref()
            .ok_or(WireframeError::MissingGeometry)
            .and_then(Wireframe::from_geojson_geometry);

        BuildingRecord {
            index,
            id,
            properties,
            wireframe,
        }
    }

    /// Run the extractor on this building
    pub fn extract(&self, options: &ExtractionOptions) -> BuildingOutcome {
        let result = match &self.wireframe {
            Ok(wireframe) => extract_footprint_with(wireframe, options).map_err(BuildingError::from),
            Err(e) => Err(BuildingError::from(e.clone())),
        };

        BuildingOutcome {
            index: self.index,
            id: self.id.clone(),
            properties: self.properties.clone(),
            result,
        }
    }
}

/// Result of extracting one building
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingOutcome {
    pub index: usize,
    pub id: Option<String>,
    pub properties: Map<String, JsonValue>,
    pub result: Result<Footprint, BuildingError>,
}

impl BuildingOutcome {
    pub fn footprint(&self) -> Option<&Footprint> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&BuildingError> {
        self.result.as_ref().err()
    }

    /// Human readable label for logs
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => format!("#{} ({})", self.index, id),
            None => format!("#{}", self.index),
        }
    }
}

/// Counts over a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub assembled: usize,
    pub approximated: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.assembled + self.approximated
    }
}

/// Per-building outcomes of a batch, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<BuildingOutcome>,
    /// CRS of the footprint coordinates
    pub geo_core: GeoCore,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.outcomes.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match outcome.footprint().map(|f| f.method) {
                Some(ExtractionMethod::Assembled) => summary.assembled += 1,
                Some(ExtractionMethod::ConvexHull) => summary.approximated += 1,
                None => summary.failed += 1,
            }
        }
        summary
    }

    /// Successful outcomes with their footprint
    pub fn footprints(&self) -> impl Iterator<Item = (&BuildingOutcome, &Footprint)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.footprint().map(|f| (outcome, f)))
    }

    /// Failed outcomes with their error
    pub fn failures(&self) -> impl Iterator<Item = (&BuildingOutcome, &BuildingError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.error().map(|e| (outcome, e)))
    }

    /// Extent of every extracted footprint
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::covering(self.footprints().map(|(_, f)| &f.polygon))
    }

    /// Footprints as GeoJSON features for map renderers.
    ///
    /// Input properties are kept and `ground_level`, `building_height`,
    /// `footprint_area` and `footprint_method` are added. Failed buildings
    /// are left out.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .footprints()
            .map(|(outcome, footprint)| {
                let mut properties = outcome.properties.clone();
                properties.insert("ground_level".to_string(), footprint.ground_level.into());
                properties.insert("building_height".to_string(), footprint.height.into());
                properties.insert("footprint_area".to_string(), footprint.area().into());
                properties.insert(
                    "footprint_method".to_string(),
                    footprint.method.as_str().into(),
                );

                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::from(&footprint.polygon))),
                    id: outcome.id.clone().map(Id::String),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    /// Reproject every footprint into `to_epsg`
    #[cfg(feature = "proj")]
    pub fn reproject(&self, to_epsg: i32) -> Result<BatchReport> {
        let mut outcomes = self.outcomes.clone();
        for outcome in &mut outcomes {
            let label = outcome.label();
            if let Ok(footprint) = &mut outcome.result {
                footprint.polygon = self
                    .geo_core
                    .reproject_polygon(&footprint.polygon, to_epsg)
                    .with_context(|| format!("Failed to reproject building {}", label))?;
            }
        }
        Ok(BatchReport {
            outcomes,
            geo_core: GeoCore::new(to_epsg),
        })
    }
}

/// Buildings read from a wireframe GeoJSON file
#[derive(Debug, Clone, Default)]
pub struct BuildingCollection {
    pub buildings: Vec<BuildingRecord>,
    /// CRS of the input coordinates
    pub geo_core: GeoCore,
}

impl BuildingCollection {
    pub fn new(geo_core: GeoCore) -> Self {
        BuildingCollection {
            buildings: Vec::new(),
            geo_core,
        }
    }

    pub fn add_building(&mut self, building: BuildingRecord) {
        self.buildings.push(building);
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    pub fn buildings(&self) -> &[BuildingRecord] {
        &self.buildings
    }

    /// Load building wireframes from GeoJSON bytes.
    ///
    /// The CRS comes from `set_crs`, else from a legacy `crs` member of the
    /// collection, else WGS84.
    pub fn from_geojson(geojson_data: &[u8], set_crs: Option<i32>) -> Result<Self> {
        let geojson_str =
            std::str::from_utf8(geojson_data).context("GeoJSON data is not valid UTF-8")?;
        let geojson: GeoJson = geojson_str.parse().context("Failed to parse GeoJSON")?;

        let (features, file_crs) = match geojson {
            GeoJson::FeatureCollection(fc) => {
                let crs = fc.foreign_members.as_ref().and_then(epsg_from_crs_member);
                (fc.features, crs)
            }
            GeoJson::Feature(f) => (vec![f], None),
            GeoJson::Geometry(_) => {
                anyhow::bail!("GeoJSON must be a Feature or FeatureCollection");
            }
        };

        let geo_core = set_crs
            .or(file_crs)
            .map(GeoCore::new)
            .unwrap_or_default();
        let mut collection = BuildingCollection::new(geo_core);

        for (index, feature) in features.iter().enumerate() {
            let record = BuildingRecord::from_feature(index, feature);
            if let Err(e) = &record.wireframe {
                debug!("Building #{} has no usable wireframe: {}", index, e);
            }
            collection.add_building(record);
        }

        info!(
            "Loaded {} buildings (EPSG:{})",
            collection.len(),
            collection.geo_core.get_epsg()
        );
        Ok(collection)
    }

    /// Load building wireframes from a GeoJSON file
    pub fn from_path<P: AsRef<Path>>(path: P, set_crs: Option<i32>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read GeoJSON file: {:?}", path))?;
        Self::from_geojson(&data, set_crs)
            .with_context(|| format!("Failed to load buildings from {:?}", path))
    }

    /// Load from the first existing input candidate of `config`
    pub fn load(config: &BatchConfig) -> Result<Self> {
        let path = config.resolve_input()?;
        info!("Reading buildings from {:?}", path);
        Self::from_path(path, config.set_crs)
    }

    /// Extract every building's footprint.
    ///
    /// One building failing never stops the others; the report holds one
    /// outcome per building in input order.
    pub fn extract_footprints(&self, config: &BatchConfig) -> BatchReport {
        if self.geo_core.is_geographic() && config.options.snap() >= GEOGRAPHIC_SNAP_WARNING {
            warn!(
                "Snap distance {} is in degrees for EPSG:{}, building corners may merge",
                config.options.snap(),
                self.geo_core.get_epsg()
            );
        }

        #[cfg(feature = "indicatif")]
        let progress = config.show_progress.then(|| {
            let pb = ProgressBar::new(self.buildings.len() as u64);
            pb.set_style(progress_style());
            pb.set_message("Extracting footprints");
            pb
        });

        #[cfg(feature = "indicatif")]
        let extract = |record: &BuildingRecord| {
            let outcome = record.extract(&config.options);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            outcome
        };
        #[cfg(not(feature = "indicatif"))]
        let extract = |record: &BuildingRecord| record.extract(&config.options);

        #[cfg(feature = "rayon")]
        let outcomes: Vec<BuildingOutcome> = if config.parallel {
            self.buildings.par_iter().map(extract).collect()
        } else {
            self.buildings.iter().map(extract).collect()
        };

        #[cfg(not(feature = "rayon"))]
        let outcomes: Vec<BuildingOutcome> = self.buildings.iter().map(extract).collect();

        #[cfg(feature = "indicatif")]
        if let Some(pb) = &progress {
            pb.finish_with_message("Footprints extracted");
        }

        let report = BatchReport {
            outcomes,
            geo_core: self.geo_core,
        };
        for (outcome, error) in report.failures() {
            warn!("Building {}: {}", outcome.label(), error);
        }
        let summary = report.summary();
        info!(
            "Footprints: {} of {} extracted ({} approximated), {} failed",
            summary.succeeded(),
            summary.total,
            summary.approximated,
            summary.failed
        );
        report
    }
}

/// Resolve the input of `config`, load it and extract every footprint
pub fn run_batch(config: &BatchConfig) -> Result<BatchReport> {
    let collection = BuildingCollection::load(config)?;
    Ok(collection.extract_footprints(config))
}

/// EPSG code from a pre-RFC 7946 `"crs": {"type": "name", ...}` member,
/// e.g. `urn:ogc:def:crs:EPSG::25832` or `EPSG:2154`
fn epsg_from_crs_member(foreign_members: &Map<String, JsonValue>) -> Option<i32> {
    let name = foreign_members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    if name.ends_with("CRS84") {
        return Some(crate::geo_core::WGS84_EPSG);
    }
    name.rsplit(':').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use serde_json::json;

    fn cube_feature(id: &str, x0: f64, z0: f64) -> JsonValue {
        let c = [(x0, 0.0), (x0 + 1.0, 0.0), (x0 + 1.0, 1.0), (x0, 1.0)];
        let mut lines = Vec::new();
        for i in 0..4 {
            let (ax, ay) = c[i];
            let (bx, by) = c[(i + 1) % 4];
            lines.push(json!([[ax, ay, z0], [bx, by, z0]]));
            lines.push(json!([[ax, ay, z0 + 3.0], [bx, by, z0 + 3.0]]));
            lines.push(json!([[ax, ay, z0], [ax, ay, z0 + 3.0]]));
        }
        json!({
            "type": "Feature",
            "properties": { "gml_id": id, "expected_deaths_mean": 1.5e-5 },
            "geometry": { "type": "MultiLineString", "coordinates": lines }
        })
    }

    fn collection_json(features: Vec<JsonValue>) -> Vec<u8> {
        json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::25832" } },
            "features": features
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_from_geojson_reads_wireframes_and_crs() {
        let data = collection_json(vec![cube_feature("a", 0.0, 4.0), cube_feature("b", 5.0, 2.0)]);
        let collection = BuildingCollection::from_geojson(&data, None).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.geo_core.get_epsg(), 25832);
        assert_eq!(collection.buildings()[1].id.as_deref(), Some("b"));
        assert_eq!(collection.buildings()[0].wireframe.as_ref().unwrap().len(), 12);

        let overridden = BuildingCollection::from_geojson(&data, Some(2154)).unwrap();
        assert_eq!(overridden.geo_core.get_epsg(), 2154);
    }

    #[test]
    fn test_from_geojson_rejects_bare_geometry() {
        let data = br#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(BuildingCollection::from_geojson(data, None).is_err());
    }

    #[test]
    fn test_lon_lat_buildings_with_default_config() {
        // Corners a few metres apart in degrees, no crs member so EPSG:4326 applies
        let c = [
            (2.3500, 48.8500),
            (2.3502, 48.8500),
            (2.3502, 48.8501),
            (2.3500, 48.8501),
        ];
        let mut lines = Vec::new();
        for i in 0..4 {
            let (ax, ay) = c[i];
            let (bx, by) = c[(i + 1) % 4];
            lines.push(json!([[ax, ay, 35.0], [bx, by, 35.0]]));
            lines.push(json!([[ax, ay, 35.0], [ax, ay, 52.0]]));
        }
        let data = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "gml_id": "paris" },
                "geometry": { "type": "MultiLineString", "coordinates": lines }
            }]
        })
        .to_string()
        .into_bytes();

        let collection = BuildingCollection::from_geojson(&data, None).unwrap();
        assert!(collection.geo_core.is_geographic());

        let report = collection.extract_footprints(&BatchConfig::default());
        assert_eq!(report.summary().assembled, 1);
        let (_, footprint) = report.footprints().next().unwrap();
        assert_eq!(footprint.polygon.exterior().0.len(), 5);
        assert_eq!(footprint.ground_level, 35.0);
        assert!(footprint.area() > 0.0);
    }

    #[test]
    fn test_progress_bar_run_matches_plain_run() {
        let data = collection_json(vec![cube_feature("a", 0.0, 0.0), cube_feature("b", 3.0, 1.0)]);
        let collection = BuildingCollection::from_geojson(&data, None).unwrap();

        let plain = collection.extract_footprints(&BatchConfig::default());
        let with_progress = collection.extract_footprints(&BatchConfig {
            show_progress: true,
            ..Default::default()
        });
        assert_eq!(plain, with_progress);
    }

    #[test]
    fn test_failures_do_not_stop_batch() {
        let polygon_feature = json!({
            "type": "Feature",
            "properties": { "gml_id": "flat" },
            "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]] }
        });
        let empty_feature = json!({
            "type": "Feature",
            "properties": {},
            "geometry": { "type": "MultiLineString", "coordinates": [] }
        });
        let data = collection_json(vec![
            cube_feature("a", 0.0, 0.0),
            polygon_feature,
            empty_feature,
            cube_feature("d", 3.0, 0.0),
        ]);
        let collection = BuildingCollection::from_geojson(&data, None).unwrap();

        let config = BatchConfig {
            parallel: false,
            ..Default::default()
        };
        let report = collection.extract_footprints(&config);

        assert_eq!(
            report.summary(),
            BatchSummary {
                total: 4,
                assembled: 2,
                approximated: 0,
                failed: 2
            }
        );
        assert!(matches!(
            report.outcomes[1].error(),
            Some(BuildingError::Read(WireframeError::UnsupportedGeometry(_)))
        ));
        assert_eq!(
            report.outcomes[2].error(),
            Some(&BuildingError::Extraction(ExtractionError::EmptyInput))
        );
        let ids: Vec<_> = report.footprints().map(|(o, _)| o.id.clone()).collect();
        assert_eq!(ids, vec![Some("a".to_string()), Some("d".to_string())]);
        let failed: Vec<_> = report.failures().map(|(o, _)| o.index).collect();
        assert_eq!(failed, vec![1, 2]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let features = (0..20)
            .map(|i| cube_feature(&i.to_string(), i as f64 * 2.0, i as f64))
            .collect();
        let collection = BuildingCollection::from_geojson(&collection_json(features), None).unwrap();

        let sequential = collection.extract_footprints(&BatchConfig {
            parallel: false,
            ..Default::default()
        });
        let parallel = collection.extract_footprints(&BatchConfig::default());
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_feature_collection_output() {
        let data = collection_json(vec![cube_feature("a", 0.0, 4.0)]);
        let collection = BuildingCollection::from_geojson(&data, None).unwrap();
        let report = collection.extract_footprints(&BatchConfig::default());

        let fc = report.to_feature_collection();
        assert_eq!(fc.features.len(), 1);
        let feature = &fc.features[0];
        assert_eq!(feature.id, Some(Id::String("a".to_string())));
        let props = feature.properties.as_ref().unwrap();
        assert_eq!(props["ground_level"], json!(4.0));
        assert_eq!(props["building_height"], json!(3.0));
        assert_eq!(props["footprint_method"], json!("assembled"));
        assert_eq!(props["expected_deaths_mean"], json!(1.5e-5));
        match &feature.geometry.as_ref().unwrap().value {
            Value::Polygon(rings) => assert_eq!(rings[0].len(), 5),
            other => panic!("expected polygon, got {:?}", other),
        }

        let bounds = report.bounds().unwrap();
        assert_eq!(bounds, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_resolve_input_picks_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("buildings.geojson");
        std::fs::write(&present, collection_json(vec![cube_feature("a", 0.0, 0.0)])).unwrap();

        let config = BatchConfig::new([dir.path().join("missing.geojson"), present.clone()]);
        assert_eq!(config.resolve_input().unwrap(), present.as_path());

        let report = run_batch(&config).unwrap();
        assert_eq!(report.summary().assembled, 1);

        let nothing = BatchConfig::new([dir.path().join("missing.geojson")]);
        assert!(nothing.resolve_input().is_err());
        assert!(run_batch(&nothing).is_err());
    }

    #[cfg(feature = "proj")]
    #[test]
    fn test_reproject_keeps_failures() {
        let data = collection_json(vec![cube_feature("a", 500000.0, 0.0), json!({
            "type": "Feature",
            "properties": {},
            "geometry": { "type": "MultiLineString", "coordinates": [] }
        })]);
        let collection = BuildingCollection::from_geojson(&data, None).unwrap();
        let report = collection.extract_footprints(&BatchConfig::default());

        // Needs proj data installed; only check the result when it is
        if let Ok(reprojected) = report.reproject(4326) {
            assert_eq!(reprojected.geo_core.get_epsg(), 4326);
            assert_eq!(reprojected.summary(), report.summary());
            let (_, footprint) = reprojected.footprints().next().unwrap();
            assert!(footprint.polygon.exterior().0.iter().all(|c| c.x.is_finite()));
        }
    }

    #[test]
    fn test_epsg_from_crs_member() {
        let members = |name: &str| {
            json!({ "crs": { "type": "name", "properties": { "name": name } } })
                .as_object()
                .unwrap()
                .clone()
        };
        assert_eq!(epsg_from_crs_member(&members("EPSG:2154")), Some(2154));
        assert_eq!(
            epsg_from_crs_member(&members("urn:ogc:def:crs:OGC:1.3:CRS84")),
            Some(4326)
        );
        assert_eq!(epsg_from_crs_member(&Map::new()), None);
    }
}
