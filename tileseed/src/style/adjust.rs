//! Style adjustment for tiling matrices other than `WebMercatorQuad`.
//!
//! Grids with a zoom offset address the same ground resolution at a
//! different zoom number, so every zoom-dependent part of the style is
//! shifted by the offset. Raster content is removed because only vector
//! sources are served in those grids.

use crate::tms::{TileMatrixSet, WEB_MERCATOR_QUAD};
use serde_json::{Map, Value};

/// Return a copy of `style` adjusted for `tms`.
///
/// Identity for `WebMercatorQuad`.
pub fn adjust_style(style: &Value, tms: &TileMatrixSet) -> Value {
    if tms.is_web_mercator() {
        return style.clone();
    }

    let mut adjusted = style.clone();
    let Some(root) = adjusted.as_object_mut() else {
        return adjusted;
    };

    root.remove("metadata");

    if let Some(Value::Object(sources)) = root.get_mut("sources") {
        sources.retain(|_, source| source.get("type").and_then(Value::as_str) == Some("vector"));
        for source in sources.values_mut() {
            if let Value::Object(source) = source {
                adjust_source(source, tms);
            }
        }
    }

    if let Some(Value::Array(layers)) = root.get_mut("layers") {
        layers.retain(|layer| layer.get("type").and_then(Value::as_str) != Some("raster"));
        if tms.zoom_delta != 0 {
            for layer in layers.iter_mut() {
                if let Value::Object(layer) = layer {
                    shift_zoom_bounds(layer, tms.zoom_delta);
                    adjust_properties(layer, tms.zoom_delta);
                }
            }
        }
    }

    adjusted
}

fn adjust_source(source: &mut Map<String, Value>, tms: &TileMatrixSet) {
    let tiles = match (source.get("tiles"), source.get("url")) {
        (Some(Value::Array(tiles)), _) => Some(
            tiles
                .iter()
                .map(|url| match url.as_str() {
                    Some(url) => Value::String(url.replace(WEB_MERCATOR_QUAD, tms.name)),
                    None => url.clone(),
                })
                .collect::<Vec<_>>(),
        ),
        (_, Some(Value::String(url))) => Some(vec![Value::String(
            url.replace("?f=tilejson", "/{z}/{y}/{x}?f=mvt")
                .replace(WEB_MERCATOR_QUAD, tms.name),
        )]),
        _ => None,
    };

    source.remove("url");
    match tiles {
        Some(tiles) => {
            source.insert("tiles".into(), Value::Array(tiles));
        }
        None => {
            source.remove("tiles");
        }
    }

    shift_zoom_bounds(source, tms.zoom_delta);
}

/// Shift non-zero `minzoom`/`maxzoom`, clamped at 0.
fn shift_zoom_bounds(object: &mut Map<String, Value>, delta: i32) {
    for key in ["minzoom", "maxzoom"] {
        if let Some(zoom) = object.get(key).and_then(Value::as_f64) {
            if zoom != 0.0 {
                object.insert(key.into(), shift(zoom, delta));
            }
        }
    }
}

fn adjust_properties(layer: &mut Map<String, Value>, delta: i32) {
    for group in ["paint", "layout"] {
        if let Some(Value::Object(properties)) = layer.get_mut(group) {
            for value in properties.values_mut() {
                adjust_property(value, delta);
            }
        }
    }
}

/// Shift zoom stops of a legacy function or the zoom inputs of an
/// `interpolate` or `step` expression.
fn adjust_property(value: &mut Value, delta: i32) {
    match value {
        Value::Object(function) => {
            if let Some(Value::Array(stops)) = function.get_mut("stops") {
                for stop in stops.iter_mut() {
                    if let Value::Array(pair) = stop {
                        if pair.len() == 2 {
                            if let Some(zoom) = pair[0].as_f64() {
                                pair[0] = shift(zoom, delta);
                            }
                        }
                    }
                }
            }
        }
        Value::Array(expression) => {
            let Some(zoom_index) = expression.iter().position(is_zoom_input) else {
                return;
            };

            // interpolate: input, stop, output, stop, output...
            // step: input, default output, stop, output...
            let first_stop = match expression.first().and_then(Value::as_str) {
                Some("step") => zoom_index + 2,
                _ => zoom_index + 1,
            };

            for item in expression.iter_mut().skip(first_stop).step_by(2) {
                if let Some(zoom) = item.as_f64() {
                    *item = shift(zoom, delta);
                }
            }
        }
        _ => {}
    }
}

fn is_zoom_input(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.len() == 1 && items[0].as_str() == Some("zoom"))
}

fn shift(zoom: f64, delta: i32) -> Value {
    let shifted = (zoom + delta as f64).max(0.0);
    if shifted.fract() == 0.0 {
        Value::from(shifted as i64)
    } else {
        Value::from(shifted)
    }
}
