use crate::geometry::Point;

/// 2-D affine transform, row-major 2×3:
///
/// ```text
/// x' = a·x + b·y + c
/// y' = d·x + e·y + f
/// ```
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

/// Inversion failure: the transform collapses the plane (|det| ~ 0), which
/// for a viewport means a degenerate scale.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NonInvertibleTransform {
    pub det: f64,
}

impl std::fmt::Display for NonInvertibleTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "affine transform is not invertible (det={})", self.det)
    }
}

impl std::error::Error for NonInvertibleTransform {}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, tx, 0.0, 1.0, ty)
    }

    pub fn scaling(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, 0.0, sy, 0.0)
    }

    /// Counter-clockwise rotation by `angle` radians about the origin.
    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos, -sin, 0.0, sin, cos, 0.0)
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.b * p.y + self.c,
            self.d * p.x + self.e * p.y + self.f,
        )
    }

    /// Composition that applies `self` first, then `next`.
    pub fn then(&self, next: &Affine) -> Affine {
        Affine::new(
            next.a * self.a + next.b * self.d,
            next.a * self.b + next.b * self.e,
            next.a * self.c + next.b * self.f + next.c,
            next.d * self.a + next.e * self.d,
            next.d * self.b + next.e * self.e,
            next.d * self.c + next.e * self.f + next.f,
        )
    }

    pub fn det(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    pub fn invert(&self) -> Result<Affine, NonInvertibleTransform> {
        let det = self.det();
        if !det.is_finite() || det.abs() < 1e-12 {
            return Err(NonInvertibleTransform { det });
        }
        let inv = 1.0 / det;
        Ok(Affine::new(
            self.e * inv,
            -self.b * inv,
            (self.b * self.f - self.e * self.c) * inv,
            -self.d * inv,
            self.a * inv,
            (self.d * self.c - self.a * self.f) * inv,
        ))
    }
}
