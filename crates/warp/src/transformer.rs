//! Ground-control-point transform fitting and evaluation.
//!
//! A `Transformer` pairs two independently fitted models: forward
//! (resource → projectedGeo) and backward (projectedGeo → resource), the
//! backward one fitted on swapped pairs. Inputs and outputs are normalized
//! (centered and scaled) before fitting so polynomial and kernel systems
//! stay well-conditioned at Mercator magnitudes.

use foundation::geometry::Point;
use formats::TransformationKind;

use crate::fit::{solve_least_squares, solve_linear};

#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    TooFewGcps {
        kind: TransformationKind,
        required: usize,
        found: usize,
    },
    /// The control points do not determine the model (collinear or
    /// coincident points, singular system).
    Degenerate,
    NonFiniteGcp,
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::TooFewGcps {
                kind,
                required,
                found,
            } => write!(f, "{kind} needs at least {required} gcps, found {found}"),
            TransformError::Degenerate => {
                write!(f, "control points do not determine the transform")
            }
            TransformError::NonFiniteGcp => write!(f, "control point is not finite"),
        }
    }
}

impl std::error::Error for TransformError {}

/// Centering + isotropic scaling applied before fitting.
#[derive(Debug, Copy, Clone, PartialEq)]
struct Norm {
    offset: Point,
    scale: f64,
}

impl Norm {
    fn fit<'a>(points: impl Iterator<Item = &'a Point>) -> Norm {
        let pts: Vec<&Point> = points.collect();
        let n = pts.len().max(1) as f64;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for p in &pts {
            cx += p.x;
            cy += p.y;
        }
        let offset = Point::new(cx / n, cy / n);
        let mut spread = 0.0;
        for p in &pts {
            spread += (p.x - offset.x).abs() + (p.y - offset.y).abs();
        }
        let scale = spread / (2.0 * n);
        // Snap to a power of two: scaling in and back out is then exact, so
        // a transform that is the identity stays the identity bit for bit.
        let scale = if scale.is_finite() && scale > 0.0 {
            2.0f64.powi(scale.log2().floor() as i32)
        } else {
            1.0
        };
        Norm { offset, scale }
    }

    fn apply(&self, p: Point) -> Point {
        Point::new((p.x - self.offset.x) / self.scale, (p.y - self.offset.y) / self.scale)
    }

    fn invert(&self, p: Point) -> Point {
        Point::new(p.x * self.scale + self.offset.x, p.y * self.scale + self.offset.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Model {
    /// Similarity: `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`.
    Helmert([f64; 4]),
    Polynomial {
        order: u32,
        x_coeffs: Vec<f64>,
        y_coeffs: Vec<f64>,
    },
    /// Homography with h33 fixed to 1.
    Projective([f64; 8]),
    ThinPlateSpline {
        sources: Vec<Point>,
        /// Kernel weights followed by the affine part `[a0, a1, a2]`.
        x_weights: Vec<f64>,
        y_weights: Vec<f64>,
    },
}

fn polynomial_order(kind: TransformationKind) -> Option<u32> {
    match kind {
        TransformationKind::Polynomial1 => Some(1),
        TransformationKind::Polynomial2 => Some(2),
        TransformationKind::Polynomial3 => Some(3),
        _ => None,
    }
}

fn poly_terms(order: u32, p: Point) -> Vec<f64> {
    let (x, y) = (p.x, p.y);
    let mut terms = vec![1.0, x, y];
    if order >= 2 {
        terms.extend([x * x, x * y, y * y]);
    }
    if order >= 3 {
        terms.extend([x * x * x, x * x * y, x * y * y, y * y * y]);
    }
    terms
}

/// Thin-plate radial basis, `U(r) = r²·ln(r²)`, with `U(0) = 0`.
fn tps_kernel(r2: f64) -> f64 {
    if r2 > 0.0 { r2 * r2.ln() } else { 0.0 }
}

impl Model {
    fn fit(kind: TransformationKind, pairs: &[(Point, Point)]) -> Result<Model, TransformError> {
        match kind {
            TransformationKind::Helmert => {
                let mut rows = Vec::with_capacity(pairs.len() * 2);
                let mut rhs = Vec::with_capacity(pairs.len() * 2);
                for (src, dst) in pairs {
                    rows.push(vec![src.x, -src.y, 1.0, 0.0]);
                    rhs.push(dst.x);
                    rows.push(vec![src.y, src.x, 0.0, 1.0]);
                    rhs.push(dst.y);
                }
                let p = solve_least_squares(&rows, &rhs).ok_or(TransformError::Degenerate)?;
                Ok(Model::Helmert([p[0], p[1], p[2], p[3]]))
            }
            TransformationKind::Polynomial1
            | TransformationKind::Polynomial2
            | TransformationKind::Polynomial3 => {
                let order = polynomial_order(kind).unwrap_or(1);
                let rows: Vec<Vec<f64>> =
                    pairs.iter().map(|(src, _)| poly_terms(order, *src)).collect();
                let rhs_x: Vec<f64> = pairs.iter().map(|(_, dst)| dst.x).collect();
                let rhs_y: Vec<f64> = pairs.iter().map(|(_, dst)| dst.y).collect();
                let x_coeffs =
                    solve_least_squares(&rows, &rhs_x).ok_or(TransformError::Degenerate)?;
                let y_coeffs =
                    solve_least_squares(&rows, &rhs_y).ok_or(TransformError::Degenerate)?;
                Ok(Model::Polynomial {
                    order,
                    x_coeffs,
                    y_coeffs,
                })
            }
            TransformationKind::Projective => {
                let mut rows = Vec::with_capacity(pairs.len() * 2);
                let mut rhs = Vec::with_capacity(pairs.len() * 2);
                for (src, dst) in pairs {
                    rows.push(vec![
                        src.x,
                        src.y,
                        1.0,
                        0.0,
                        0.0,
                        0.0,
                        -src.x * dst.x,
                        -src.y * dst.x,
                    ]);
                    rhs.push(dst.x);
                    rows.push(vec![
                        0.0,
                        0.0,
                        0.0,
                        src.x,
                        src.y,
                        1.0,
                        -src.x * dst.y,
                        -src.y * dst.y,
                    ]);
                    rhs.push(dst.y);
                }
                let h = solve_least_squares(&rows, &rhs).ok_or(TransformError::Degenerate)?;
                Ok(Model::Projective([
                    h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7],
                ]))
            }
            TransformationKind::ThinPlateSpline => {
                let n = pairs.len();
                let dim = n + 3;
                let mut matrix = vec![vec![0.0; dim]; dim];
                for i in 0..n {
                    let si = pairs[i].0;
                    for j in 0..n {
                        let sj = pairs[j].0;
                        let dx = si.x - sj.x;
                        let dy = si.y - sj.y;
                        matrix[i][j] = tps_kernel(dx * dx + dy * dy);
                    }
                    matrix[i][n] = 1.0;
                    matrix[i][n + 1] = si.x;
                    matrix[i][n + 2] = si.y;
                    matrix[n][i] = 1.0;
                    matrix[n + 1][i] = si.x;
                    matrix[n + 2][i] = si.y;
                }

                let mut rhs_x = vec![0.0; dim];
                let mut rhs_y = vec![0.0; dim];
                for (i, (_, dst)) in pairs.iter().enumerate() {
                    rhs_x[i] = dst.x;
                    rhs_y[i] = dst.y;
                }

                let x_weights =
                    solve_linear(matrix.clone(), rhs_x).ok_or(TransformError::Degenerate)?;
                let y_weights = solve_linear(matrix, rhs_y).ok_or(TransformError::Degenerate)?;
                Ok(Model::ThinPlateSpline {
                    sources: pairs.iter().map(|(src, _)| *src).collect(),
                    x_weights,
                    y_weights,
                })
            }
        }
    }

    fn apply(&self, p: Point) -> Point {
        match self {
            Model::Helmert([a, b, tx, ty]) => {
                Point::new(a * p.x - b * p.y + tx, b * p.x + a * p.y + ty)
            }
            Model::Polynomial {
                order,
                x_coeffs,
                y_coeffs,
            } => {
                let terms = poly_terms(*order, p);
                let mut x = 0.0;
                let mut y = 0.0;
                for (i, t) in terms.iter().enumerate() {
                    x += x_coeffs[i] * t;
                    y += y_coeffs[i] * t;
                }
                Point::new(x, y)
            }
            Model::Projective(h) => {
                let w = h[6] * p.x + h[7] * p.y + 1.0;
                Point::new(
                    (h[0] * p.x + h[1] * p.y + h[2]) / w,
                    (h[3] * p.x + h[4] * p.y + h[5]) / w,
                )
            }
            Model::ThinPlateSpline {
                sources,
                x_weights,
                y_weights,
            } => {
                let n = sources.len();
                let mut x = x_weights[n] + x_weights[n + 1] * p.x + x_weights[n + 2] * p.y;
                let mut y = y_weights[n] + y_weights[n + 1] * p.x + y_weights[n + 2] * p.y;
                for (i, s) in sources.iter().enumerate() {
                    let dx = p.x - s.x;
                    let dy = p.y - s.y;
                    let u = tps_kernel(dx * dx + dy * dy);
                    x += x_weights[i] * u;
                    y += y_weights[i] * u;
                }
                Point::new(x, y)
            }
        }
    }
}

/// One direction of a fitted transform, with its normalization.
#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    model: Model,
    input: Norm,
    output: Norm,
}

impl Fitted {
    fn fit(kind: TransformationKind, pairs: &[(Point, Point)]) -> Result<Fitted, TransformError> {
        let input = Norm::fit(pairs.iter().map(|(src, _)| src));
        let output = Norm::fit(pairs.iter().map(|(_, dst)| dst));
        let normalized: Vec<(Point, Point)> = pairs
            .iter()
            .map(|(src, dst)| (input.apply(*src), output.apply(*dst)))
            .collect();
        let model = Model::fit(kind, &normalized)?;
        Ok(Fitted {
            model,
            input,
            output,
        })
    }

    fn apply(&self, p: Point) -> Point {
        self.output.invert(self.model.apply(self.input.apply(p)))
    }
}

/// Bidirectional map between resource and projectedGeo coordinates, fitted
/// to ground control points.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformer {
    kind: TransformationKind,
    forward: Fitted,
    backward: Fitted,
}

impl Transformer {
    /// Fit both directions to `(resource, projectedGeo)` pairs.
    pub fn fit(
        kind: TransformationKind,
        pairs: &[(Point, Point)],
    ) -> Result<Transformer, TransformError> {
        let required = kind.min_gcps();
        if pairs.len() < required {
            return Err(TransformError::TooFewGcps {
                kind,
                required,
                found: pairs.len(),
            });
        }
        if pairs
            .iter()
            .any(|(src, dst)| !src.is_finite() || !dst.is_finite())
        {
            return Err(TransformError::NonFiniteGcp);
        }

        let swapped: Vec<(Point, Point)> = pairs.iter().map(|(src, dst)| (*dst, *src)).collect();
        Ok(Transformer {
            kind,
            forward: Fitted::fit(kind, pairs)?,
            backward: Fitted::fit(kind, &swapped)?,
        })
    }

    pub fn kind(&self) -> TransformationKind {
        self.kind
    }

    /// Resource → projectedGeo.
    pub fn forward(&self, p: Point) -> Point {
        self.forward.apply(p)
    }

    /// ProjectedGeo → resource. A non-finite result means the point is
    /// outside the transformable domain ("no data").
    pub fn backward(&self, p: Point) -> Point {
        self.backward.apply(p)
    }

    /// Forward Jacobian by central differences, column-major
    /// `[[dx'/dx, dx'/dy], [dy'/dx, dy'/dy]]`.
    pub fn forward_jacobian(&self, p: Point) -> [[f64; 2]; 2] {
        let h = 1e-6 * (1.0 + p.x.abs().max(p.y.abs()));
        let ddx = (self.forward(Point::new(p.x + h, p.y))
            - self.forward(Point::new(p.x - h, p.y)))
            * (0.5 / h);
        let ddy = (self.forward(Point::new(p.x, p.y + h))
            - self.forward(Point::new(p.x, p.y - h)))
            * (0.5 / h);
        [[ddx.x, ddy.x], [ddx.y, ddy.y]]
    }

    /// Isotropic scale of the forward map at `p`: projectedGeo units per
    /// resource pixel.
    pub fn forward_scale(&self, p: Point) -> f64 {
        let j = self.forward_jacobian(p);
        (j[0][0] * j[1][1] - j[0][1] * j[1][0]).abs().sqrt()
    }

    /// Log area ratio of the forward map, the per-vertex distortion scalar.
    pub fn log_distortion(&self, p: Point) -> f64 {
        let j = self.forward_jacobian(p);
        let det = (j[0][0] * j[1][1] - j[0][1] * j[1][0]).abs();
        det.max(f64::MIN_POSITIVE).ln()
    }
}
