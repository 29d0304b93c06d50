// Example: extracting ground footprints from CityGML-style wireframes
// Two buildings: a box whose floor closes into a ring, and one whose floor
// outline is broken so the convex hull fallback kicks in
use anyhow::Result;
use rsfootprint::{BatchConfig, BuildingCollection, ExtractionOptions};

fn main() -> Result<()> {
    println!("=== Example: Extracting footprints from 3D wireframes ===\n");

    let geojson_data = r#"
    {
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "gml_id": "BLDG_A", "citygml_storeys_above_ground": 3 },
                "geometry": {
                    "type": "MultiLineString",
                    "coordinates": [
                        [[0.0, 0.0, 10.0], [12.0, 0.0, 10.0]],
                        [[12.0, 0.0, 10.0], [12.0, 8.0, 10.0]],
                        [[12.0, 8.0, 10.0], [0.0, 8.0, 10.0]],
                        [[0.0, 8.0, 10.0], [0.0, 0.0, 10.0]],
                        [[0.0, 0.0, 10.0], [0.0, 0.0, 19.5]],
                        [[12.0, 0.0, 10.0], [12.0, 0.0, 19.5]],
                        [[12.0, 8.0, 10.0], [12.0, 8.0, 19.5]],
                        [[0.0, 8.0, 10.0], [0.0, 8.0, 19.5]],
                        [[0.0, 0.0, 19.5], [12.0, 0.0, 19.5]],
                        [[12.0, 0.0, 19.5], [12.0, 8.0, 19.5]],
                        [[12.0, 8.0, 19.5], [0.0, 8.0, 19.5]],
                        [[0.0, 8.0, 19.5], [0.0, 0.0, 19.5]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "gml_id": "BLDG_B" },
                "geometry": {
                    "type": "MultiLineString",
                    "coordinates": [
                        [[20.0, 0.0, 11.0], [26.0, 0.0, 11.0], [26.0, 5.0, 11.0]],
                        [[20.0, 5.0, 11.2], [20.0, 2.0, 11.2]],
                        [[26.0, 5.0, 11.0], [26.0, 5.0, 17.0]]
                    ]
                }
            }
        ]
    }
    "#;

    let collection = BuildingCollection::from_geojson(geojson_data.as_bytes(), Some(25832))?;
    println!("Buildings loaded: {}", collection.len());

    let config = BatchConfig::default().with_options(ExtractionOptions::new(0.5));
    let report = collection.extract_footprints(&config);

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(footprint) => {
                println!("  Building {}:", outcome.label());
                println!("    - Method: {}", footprint.method.as_str());
                println!("    - Ground level: {:.2} m", footprint.ground_level);
                println!("    - Height: {:.2} m", footprint.height);
                println!("    - Area: {:.2} m²", footprint.area());
                println!("    - Vertices: {}", footprint.vertices().len());
                if let Some(advisory) = footprint.advisory() {
                    println!("    - Advisory: {:?}", advisory);
                }
            }
            Err(e) => println!("  Building {}: failed ({})", outcome.label(), e),
        }
    }

    let summary = report.summary();
    println!(
        "\nExtracted {} of {} ({} approximated, {} failed)",
        summary.succeeded(),
        summary.total,
        summary.approximated,
        summary.failed
    );

    if let Some(bounds) = report.bounds() {
        let center = bounds.center();
        println!("Map center: ({:.2}, {:.2})", center.x, center.y);
    }

    let fc = report.to_feature_collection();
    println!("\nGeoJSON output:\n{}", serde_json::to_string_pretty(&fc)?);

    Ok(())
}
