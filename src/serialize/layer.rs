//! The `layer.json` metadata sidecar: a TileJSON document describing the
//! tileset bounds and the available tile ranges per zoom.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::TerrainResult;
use crate::geo::Srs;
use crate::geometry::{CrsBounds, TileBounds};

#[derive(Serialize)]
struct LayerJson<'a> {
    tilejson: &'a str,
    name: &'a str,
    description: &'a str,
    version: &'a str,
    format: &'a str,
    scheme: &'a str,
    tiles: Vec<&'a str>,
    projection: String,
    bounds: [f64; 4],
    minzoom: u8,
    maxzoom: u8,
    available: Vec<Vec<AvailableRange>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailableRange {
    start_x: u32,
    start_y: u32,
    end_x: u32,
    end_y: u32,
}

/// What the sidecar says about a tileset.
pub struct LayerDescription<'a> {
    pub name: &'a str,
    /// `heightmap-1.0` or `quantized-mesh-1.0`.
    pub format: &'a str,
    pub srs: Srs,
    pub bounds: CrsBounds,
    pub start_zoom: u8,
    pub end_zoom: u8,
}

/// Write `layer.json` into `out_dir`. `range_for_zoom` supplies the covered
/// tile rectangle per zoom level.
pub fn write_layer_json<F>(
    out_dir: &Path,
    description: &LayerDescription,
    range_for_zoom: F,
) -> TerrainResult<()>
where
    F: Fn(u8) -> TileBounds,
{
    let mut available = Vec::with_capacity(description.start_zoom as usize + 1);
    for zoom in 0..=description.start_zoom {
        if zoom < description.end_zoom {
            available.push(Vec::new());
            continue;
        }
        let range = range_for_zoom(zoom);
        available.push(vec![AvailableRange {
            start_x: range.min_x(),
            start_y: range.min_y(),
            end_x: range.max_x(),
            end_y: range.max_y(),
        }]);
    }

    let doc = LayerJson {
        tilejson: "3.0.0",
        name: description.name,
        description: "",
        version: "1.0.0",
        format: description.format,
        scheme: "tms",
        tiles: vec!["{z}/{x}/{y}.terrain"],
        projection: description.srs.authority_string(),
        bounds: [
            description.bounds.min_x(),
            description.bounds.min_y(),
            description.bounds.max_x(),
            description.bounds.max_y(),
        ],
        minzoom: description.end_zoom,
        maxzoom: description.start_zoom,
        available,
    };

    let json = serde_json::to_string_pretty(&doc)
        .map_err(|e| crate::error::TerrainError::Encode(e.to_string()))?;
    fs::write(out_dir.join("layer.json"), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_contains_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let description = LayerDescription {
            name: "test-terrain",
            format: "heightmap-1.0",
            srs: Srs::WGS84,
            bounds: CrsBounds::ordered(0.0, 40.0, 10.0, 50.0),
            start_zoom: 2,
            end_zoom: 1,
        };
        write_layer_json(dir.path(), &description, |zoom| {
            TileBounds::ordered(0, 0, (1 << zoom) as u32, (1 << zoom) as u32 / 2)
        })
        .unwrap();

        let text = fs::read_to_string(dir.path().join("layer.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["format"], "heightmap-1.0");
        assert_eq!(doc["projection"], "EPSG:4326");
        assert_eq!(doc["maxzoom"], 2);
        // Zoom 0 is below the end zoom and has no ranges.
        assert_eq!(doc["available"][0].as_array().unwrap().len(), 0);
        assert_eq!(doc["available"][2][0]["endX"], 4);
    }
}
