use crate::geometry::Point;

/// Axis-aligned bounding box in a planar coordinate space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bbox {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Bbox {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Bbox { min, max }
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        let mut iter = points.iter().filter(|p| p.is_finite());
        let first = iter.next()?;
        let mut b = Bbox::new([first.x, first.y], [first.x, first.y]);
        for p in iter {
            b.expand_to_include(*p);
        }
        Some(b)
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.min[0] && p.x <= self.max[0] && p.y >= self.min[1] && p.y <= self.max[1]
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !(self.max[0] < other.min[0]
            || self.min[0] > other.max[0]
            || self.max[1] < other.min[1]
            || self.min[1] > other.max[1])
    }

    pub fn expand_to_include(&mut self, p: Point) {
        self.min[0] = self.min[0].min(p.x);
        self.min[1] = self.min[1].min(p.y);
        self.max[0] = self.max[0].max(p.x);
        self.max[1] = self.max[1].max(p.y);
    }

    pub fn union(&self, other: &Self) -> Self {
        Bbox::new(
            [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
            ],
            [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
            ],
        )
    }

    pub fn width(&self) -> f64 {
        (self.max[0] - self.min[0]).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.max[1] - self.min[1]).max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        )
    }

    /// Grow each side by `ratio` times the larger dimension. Used to pre-warm
    /// tiles just outside the viewport.
    pub fn buffered(&self, ratio: f64) -> Self {
        let pad = self.width().max(self.height()) * ratio;
        Bbox::new(
            [self.min[0] - pad, self.min[1] - pad],
            [self.max[0] + pad, self.max[1] + pad],
        )
    }

    /// Corners in counter-clockwise order starting at `min`.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min[0], self.min[1]),
            Point::new(self.max[0], self.min[1]),
            Point::new(self.max[0], self.max[1]),
            Point::new(self.min[0], self.max[1]),
        ]
    }
}
