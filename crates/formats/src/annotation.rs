//! Data model of a validated Georeference Annotation.
//!
//! Schema validation proper happens upstream; this module parses the
//! already-validated JSON shape and enforces the structural invariants the
//! engine relies on (mask simplicity, minimum control-point counts).

use serde::{Deserialize, Serialize};

use foundation::geometry::{Point, ring_is_simple};

/// The fitted-transform families the engine understands, together with the
/// number of control points each needs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransformationKind {
    Helmert,
    Polynomial1,
    Polynomial2,
    Polynomial3,
    ThinPlateSpline,
    Projective,
}

impl TransformationKind {
    /// Minimum ground-control-point count for a well-posed fit.
    pub fn min_gcps(&self) -> usize {
        match self {
            TransformationKind::Helmert => 2,
            TransformationKind::Polynomial1 => 3,
            TransformationKind::Polynomial2 => 6,
            TransformationKind::Polynomial3 => 10,
            TransformationKind::ThinPlateSpline => 3,
            TransformationKind::Projective => 4,
        }
    }
}

impl std::fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransformationKind::Helmert => "helmert",
            TransformationKind::Polynomial1 => "polynomial-1",
            TransformationKind::Polynomial2 => "polynomial-2",
            TransformationKind::Polynomial3 => "polynomial-3",
            TransformationKind::ThinPlateSpline => "thin-plate-spline",
            TransformationKind::Projective => "projective",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
    pub resource: AnnotationResource,
    pub gcps: Vec<AnnotationGcp>,
    pub resource_mask: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<TransformationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AnnotationGcp {
    /// Pixel coordinates in the source image, origin top-left.
    pub resource: [f64; 2],
    /// Longitude-latitude.
    pub geo: [f64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<TransformationOptions>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationOptions {
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationError {
    NotAGeoreferencedMap {
        found: String,
    },
    Parse {
        source: String,
    },
    MaskTooSmall {
        vertices: usize,
    },
    MaskSelfIntersects,
    MaskOutsideImage {
        vertex: [f64; 2],
        width: u32,
        height: u32,
    },
    TooFewGcps {
        kind: TransformationKind,
        required: usize,
        found: usize,
    },
    UnknownTransformation {
        name: String,
    },
    UnsupportedPolynomialOrder {
        order: u32,
    },
}

impl std::fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationError::NotAGeoreferencedMap { found } => {
                write!(f, "expected a GeoreferencedMap, found {found:?}")
            }
            AnnotationError::Parse { source } => {
                write!(f, "failed to parse annotation: {source}")
            }
            AnnotationError::MaskTooSmall { vertices } => {
                write!(f, "resource mask needs at least 3 vertices, found {vertices}")
            }
            AnnotationError::MaskSelfIntersects => {
                write!(f, "resource mask is self-intersecting")
            }
            AnnotationError::MaskOutsideImage {
                vertex,
                width,
                height,
            } => write!(
                f,
                "mask vertex ({}, {}) lies outside the {width}x{height} image",
                vertex[0], vertex[1]
            ),
            AnnotationError::TooFewGcps {
                kind,
                required,
                found,
            } => write!(f, "{kind} needs at least {required} gcps, found {found}"),
            AnnotationError::UnknownTransformation { name } => {
                write!(f, "unknown transformation type {name:?}")
            }
            AnnotationError::UnsupportedPolynomialOrder { order } => {
                write!(f, "polynomial order {order} is not supported (1..=3)")
            }
        }
    }
}

impl std::error::Error for AnnotationError {}

impl Annotation {
    pub fn from_json(json: &str) -> Result<Annotation, AnnotationError> {
        let annotation: Annotation =
            serde_json::from_str(json).map_err(|e| AnnotationError::Parse {
                source: e.to_string(),
            })?;
        annotation.validate()?;
        Ok(annotation)
    }

    /// Resolve the requested transformation. Absent means polynomial-1.
    pub fn transformation_kind(&self) -> Result<TransformationKind, AnnotationError> {
        let Some(spec) = &self.transformation else {
            return Ok(TransformationKind::Polynomial1);
        };
        match spec.kind.as_str() {
            "helmert" => Ok(TransformationKind::Helmert),
            "thinPlateSpline" => Ok(TransformationKind::ThinPlateSpline),
            "projective" => Ok(TransformationKind::Projective),
            "polynomial" => {
                let order = spec.options.and_then(|o| o.order).unwrap_or(1);
                match order {
                    1 => Ok(TransformationKind::Polynomial1),
                    2 => Ok(TransformationKind::Polynomial2),
                    3 => Ok(TransformationKind::Polynomial3),
                    order => Err(AnnotationError::UnsupportedPolynomialOrder { order }),
                }
            }
            other => Err(AnnotationError::UnknownTransformation {
                name: other.to_string(),
            }),
        }
    }

    /// Structural invariants the engine relies on. Runs at the edge; a map
    /// that fails here is never inserted.
    pub fn validate(&self) -> Result<(), AnnotationError> {
        if self.kind != "GeoreferencedMap" {
            return Err(AnnotationError::NotAGeoreferencedMap {
                found: self.kind.clone(),
            });
        }

        if self.resource_mask.len() < 3 {
            return Err(AnnotationError::MaskTooSmall {
                vertices: self.resource_mask.len(),
            });
        }
        if !ring_is_simple(&self.mask_ring()) {
            return Err(AnnotationError::MaskSelfIntersects);
        }
        if let (Some(width), Some(height)) = (self.resource.width, self.resource.height) {
            for v in &self.resource_mask {
                let inside =
                    v[0] >= 0.0 && v[1] >= 0.0 && v[0] <= width as f64 && v[1] <= height as f64;
                if !inside {
                    return Err(AnnotationError::MaskOutsideImage {
                        vertex: *v,
                        width,
                        height,
                    });
                }
            }
        }

        let kind = self.transformation_kind()?;
        let required = kind.min_gcps();
        if self.gcps.len() < required {
            return Err(AnnotationError::TooFewGcps {
                kind,
                required,
                found: self.gcps.len(),
            });
        }

        Ok(())
    }

    pub fn mask_ring(&self) -> Vec<Point> {
        self.resource_mask
            .iter()
            .map(|v| Point::new(v[0], v[1]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Annotation, AnnotationError, TransformationKind};

    fn annotation_json(transformation: &str, gcps: usize) -> String {
        let gcps: Vec<String> = (0..gcps)
            .map(|i| {
                format!(
                    r#"{{ "resource": [{0}.0, {1}.0], "geo": [{0}.5, {1}.5] }}"#,
                    i * 10,
                    i * 7
                )
            })
            .collect();
        format!(
            r#"{{
                "type": "GeoreferencedMap",
                "resource": {{ "id": "https://iiif.example.org/map", "type": "ImageService3", "width": 100, "height": 80 }},
                "gcps": [{}],
                "resourceMask": [[0, 0], [100, 0], [100, 80], [0, 80]]
                {}
            }}"#,
            gcps.join(","),
            transformation
        )
    }

    #[test]
    fn parses_and_defaults_to_polynomial_1() {
        let annotation = Annotation::from_json(&annotation_json("", 3)).unwrap();
        assert_eq!(
            annotation.transformation_kind().unwrap(),
            TransformationKind::Polynomial1
        );
        assert_eq!(annotation.resource.width, Some(100));
        assert_eq!(annotation.mask_ring().len(), 4);
    }

    #[test]
    fn parses_polynomial_order_option() {
        let json = annotation_json(
            r#", "transformation": { "type": "polynomial", "options": { "order": 2 } }"#,
            6,
        );
        let annotation = Annotation::from_json(&json).unwrap();
        assert_eq!(
            annotation.transformation_kind().unwrap(),
            TransformationKind::Polynomial2
        );
    }

    #[test]
    fn rejects_too_few_gcps() {
        let err = Annotation::from_json(&annotation_json("", 2)).unwrap_err();
        assert!(matches!(
            err,
            AnnotationError::TooFewGcps {
                kind: TransformationKind::Polynomial1,
                required: 3,
                found: 2,
            }
        ));
    }

    #[test]
    fn rejects_self_intersecting_mask() {
        let json = annotation_json("", 3).replace(
            "[[0, 0], [100, 0], [100, 80], [0, 80]]",
            "[[0, 0], [100, 80], [100, 0], [0, 80]]",
        );
        let err = Annotation::from_json(&json).unwrap_err();
        assert_eq!(err, AnnotationError::MaskSelfIntersects);
    }

    #[test]
    fn rejects_mask_outside_image() {
        let json = annotation_json("", 3).replace("[100, 80], [0, 80]", "[100, 81], [0, 80]");
        let err = Annotation::from_json(&json).unwrap_err();
        assert!(matches!(err, AnnotationError::MaskOutsideImage { .. }));
    }

    #[test]
    fn min_gcp_counts_per_kind() {
        assert_eq!(TransformationKind::Helmert.min_gcps(), 2);
        assert_eq!(TransformationKind::Polynomial3.min_gcps(), 10);
        assert_eq!(TransformationKind::Projective.min_gcps(), 4);
        assert_eq!(TransformationKind::ThinPlateSpline.min_gcps(), 3);
    }
}
