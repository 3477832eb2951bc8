//! IIIF Image API `info.json` data model.
//!
//! Parsing only; fetching the document is the caller's job. Both Image API
//! v2 (`@id` + profile) and v3 (`id` + `type`) documents are accepted, and
//! the detected version drives tile-URL syntax downstream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageApiVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id_v2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub tiles: Vec<TileSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_area: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TileSpec {
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub scale_factors: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageInfoError {
    Parse { source: String },
    MissingId,
}

impl std::fmt::Display for ImageInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageInfoError::Parse { source } => {
                write!(f, "failed to parse image info: {source}")
            }
            ImageInfoError::MissingId => write!(f, "image info carries neither `id` nor `@id`"),
        }
    }
}

impl std::error::Error for ImageInfoError {}

impl ImageInfo {
    pub fn from_json(json: &str) -> Result<ImageInfo, ImageInfoError> {
        serde_json::from_str(json).map_err(|e| ImageInfoError::Parse {
            source: e.to_string(),
        })
    }

    pub fn api_version(&self) -> ImageApiVersion {
        if let Some(kind) = &self.kind
            && kind.starts_with("ImageService3")
        {
            return ImageApiVersion::V3;
        }
        if let Some(context) = &self.context
            && context.to_string().contains("/image/3/")
        {
            return ImageApiVersion::V3;
        }
        if self.id.is_some() && self.id_v2.is_none() {
            return ImageApiVersion::V3;
        }
        ImageApiVersion::V2
    }

    /// The service base URI tiles hang off.
    pub fn base_id(&self) -> Result<&str, ImageInfoError> {
        self.id
            .as_deref()
            .or(self.id_v2.as_deref())
            .map(|id| id.trim_end_matches('/'))
            .ok_or(ImageInfoError::MissingId)
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageApiVersion, ImageInfo, ImageInfoError};

    const V3: &str = r#"{
        "@context": "http://iiif.io/api/image/3/context.json",
        "id": "https://iiif.example.org/image",
        "type": "ImageService3",
        "width": 5000,
        "height": 4000,
        "tiles": [{ "width": 512, "scaleFactors": [1, 2, 4, 8] }],
        "maxWidth": 2000
    }"#;

    const V2: &str = r#"{
        "@context": "http://iiif.io/api/image/2/context.json",
        "@id": "https://iiif.example.org/image/",
        "width": 3000,
        "height": 1500,
        "tiles": [{ "width": 256, "height": 256, "scaleFactors": [1, 2] }]
    }"#;

    #[test]
    fn parses_v3() {
        let info = ImageInfo::from_json(V3).unwrap();
        assert_eq!(info.api_version(), ImageApiVersion::V3);
        assert_eq!(info.base_id().unwrap(), "https://iiif.example.org/image");
        assert_eq!(info.tiles[0].scale_factors, vec![1, 2, 4, 8]);
        assert_eq!(info.tiles[0].height, None);
        assert_eq!(info.max_width, Some(2000));
    }

    #[test]
    fn parses_v2_and_strips_trailing_slash() {
        let info = ImageInfo::from_json(V2).unwrap();
        assert_eq!(info.api_version(), ImageApiVersion::V2);
        assert_eq!(info.base_id().unwrap(), "https://iiif.example.org/image");
        assert_eq!(info.tiles[0].height, Some(256));
    }

    #[test]
    fn missing_id_is_an_error() {
        let info = ImageInfo::from_json(r#"{ "width": 1, "height": 1 }"#).unwrap();
        assert_eq!(info.base_id().unwrap_err(), ImageInfoError::MissingId);
    }
}
