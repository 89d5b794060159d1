//! Style documents.
//!
//! The renderer consumes the style as opaque JSON; this module only loads it,
//! extracts its id and remaps it for non-standard tiling matrices.

mod adjust;

pub use adjust::adjust_style;

use crate::tms::TileMatrixSet;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Style loading errors.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("Invalid style document {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Style document {0} is not a JSON object")]
    NotAnObject(String),

    #[error("Style document not found: {0}")]
    Missing(String),
}

/// A parsed style document.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleDocument {
    /// Identifier used in raster output paths
    pub id: String,
    pub json: Value,
}

impl StyleDocument {
    /// Parse a style read from `path`.
    ///
    /// The id is the document's `id` field, or the file stem of `path`.
    pub fn from_slice(data: &[u8], path: &str) -> Result<Self, StyleError> {
        let json: Value = serde_json::from_slice(data).map_err(|source| StyleError::Parse {
            name: path.to_string(),
            source,
        })?;
        if !json.is_object() {
            return Err(StyleError::NotAnObject(path.to_string()));
        }

        let id = match json.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string()),
        };

        Ok(Self { id, json })
    }

    /// Copy of this style adjusted for `tms`, keeping the id.
    pub fn adjusted_for(&self, tms: &TileMatrixSet) -> Self {
        Self {
            id: self.id.clone(),
            json: adjust_style(&self.json, tms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_document() {
        let style = StyleDocument::from_slice(br#"{"id":"night","version":8}"#, "styles/day.json").unwrap();
        assert_eq!(style.id, "night");
    }

    #[test]
    fn test_id_from_file_stem() {
        let style = StyleDocument::from_slice(br#"{"version":8}"#, "vineyards/day.json").unwrap();
        assert_eq!(style.id, "day");
    }

    #[test]
    fn test_invalid_json() {
        let err = StyleDocument::from_slice(b"{", "day.json").unwrap_err();
        assert!(err.to_string().contains("day.json"));
        assert!(matches!(
            StyleDocument::from_slice(b"[]", "day.json"),
            Err(StyleError::NotAnObject(_))
        ));
    }
}
