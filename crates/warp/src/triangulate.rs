//! Resource-mask triangulation.
//!
//! The mask ring is densified, ear-cut into triangles, then uniformly
//! subdivided until no mesh edge exceeds the requested length. Subdividing
//! every triangle per round keeps the mesh conforming (shared edges split on
//! both sides, so no T-junctions), which the forward-path rasterizer relies
//! on for crack-free warps.

use earcutr::earcut;

use foundation::geometry::{Point, densify_ring, point_in_ring};

#[derive(Debug, Clone, PartialEq)]
pub enum TriangulationError {
    DegenerateRing { vertices: usize },
    Earcut { source: String },
}

impl std::fmt::Display for TriangulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriangulationError::DegenerateRing { vertices } => {
                write!(f, "ring with {vertices} usable vertices cannot be triangulated")
            }
            TriangulationError::Earcut { source } => {
                write!(f, "ear cutting failed: {source}")
            }
        }
    }
}

impl std::error::Error for TriangulationError {}

const MAX_SUBDIVISION_ROUNDS: usize = 8;

fn drop_closing_duplicate(points: &mut Vec<Point>) {
    if points.len() >= 2 {
        let first = points[0];
        let last = *points.last().unwrap();
        if (first.x - last.x).abs() < 1e-9 && (first.y - last.y).abs() < 1e-9 {
            points.pop();
        }
    }
}

fn drop_consecutive_duplicates(points: &mut Vec<Point>) {
    points.dedup_by(|a, b| (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
}

fn triangle_centroid(t: &[Point; 3]) -> Point {
    Point::new(
        (t[0].x + t[1].x + t[2].x) / 3.0,
        (t[0].y + t[1].y + t[2].y) / 3.0,
    )
}

fn longest_edge(triangles: &[[Point; 3]]) -> f64 {
    let mut longest = 0.0f64;
    for t in triangles {
        longest = longest
            .max(t[0].distance(t[1]))
            .max(t[1].distance(t[2]))
            .max(t[2].distance(t[0]));
    }
    longest
}

fn subdivide(triangles: &[[Point; 3]]) -> Vec<[Point; 3]> {
    let mut out = Vec::with_capacity(triangles.len() * 4);
    for [a, b, c] in triangles {
        let ab = a.lerp(*b, 0.5);
        let bc = b.lerp(*c, 0.5);
        let ca = c.lerp(*a, 0.5);
        out.push([*a, ab, ca]);
        out.push([ab, *b, bc]);
        out.push([ca, bc, *c]);
        out.push([ab, bc, ca]);
    }
    out
}

/// Triangulate a mask ring into a mesh whose edges are no longer than
/// `max_edge`. Returns a flat vertex list, three consecutive points per
/// triangle.
pub fn triangulate_mask(ring: &[Point], max_edge: f64) -> Result<Vec<Point>, TriangulationError> {
    let mut clean: Vec<Point> = ring.iter().copied().filter(|p| p.is_finite()).collect();
    drop_closing_duplicate(&mut clean);
    drop_consecutive_duplicates(&mut clean);
    if clean.len() < 3 {
        return Err(TriangulationError::DegenerateRing {
            vertices: clean.len(),
        });
    }

    let dense = densify_ring(&clean, max_edge);
    let mut coords: Vec<f64> = Vec::with_capacity(dense.len() * 2);
    for p in &dense {
        coords.push(p.x);
        coords.push(p.y);
    }
    let hole_indices: Vec<usize> = Vec::new();

    let indices = match earcut(&coords, &hole_indices, 2) {
        Ok(ix) => ix,
        Err(e) => {
            return Err(TriangulationError::Earcut {
                source: format!("{e:?}"),
            });
        }
    };
    let mut triangles: Vec<[Point; 3]> = indices
        .chunks_exact(3)
        .map(|c| [dense[c[0]], dense[c[1]], dense[c[2]]])
        .collect();
    if triangles.is_empty() {
        return Err(TriangulationError::DegenerateRing {
            vertices: clean.len(),
        });
    }

    if max_edge > 0.0 {
        for _ in 0..MAX_SUBDIVISION_ROUNDS {
            if longest_edge(&triangles) <= max_edge {
                break;
            }
            triangles = subdivide(&triangles);
        }
    }

    let mut out = Vec::with_capacity(triangles.len() * 3);
    for t in triangles {
        // Interior subdivision cannot escape the mask, but keep the guard:
        // a sliver along a concave edge can put its centroid outside.
        if !point_in_ring(triangle_centroid(&t), &clean) {
            continue;
        }
        out.extend(t);
    }
    Ok(out)
}
