use crate::geometry::Point;

/// Spherical-Mercator radius (meters).
pub const MERCATOR_R: f64 = 6_378_137.0;
/// Latitude beyond which spherical Mercator is undefined (degrees).
pub const MERCATOR_MAX_LAT_DEG: f64 = 85.051_128_779_806_59;

/// Mapping between longitude-latitude and the engine's projected plane.
///
/// The default plane is spherical Mercator; anything that round-trips can be
/// injected instead.
pub trait Projection {
    fn project(&self, lon_lat: Point) -> Point;
    fn unproject(&self, projected: Point) -> Point;
}

/// Spherical ("web") Mercator, EPSG:3857.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct WebMercator;

impl Projection for WebMercator {
    fn project(&self, lon_lat: Point) -> Point {
        let lat = lon_lat
            .y
            .clamp(-MERCATOR_MAX_LAT_DEG, MERCATOR_MAX_LAT_DEG);
        let x = MERCATOR_R * lon_lat.x.to_radians();
        let y = MERCATOR_R * (std::f64::consts::FRAC_PI_4 + lat.to_radians() * 0.5)
            .tan()
            .ln();
        Point::new(x, y)
    }

    fn unproject(&self, projected: Point) -> Point {
        let lon = (projected.x / MERCATOR_R).to_degrees();
        let lat = (2.0 * (projected.y / MERCATOR_R).exp().atan() - std::f64::consts::FRAC_PI_2)
            .to_degrees();
        Point::new(lon, lat)
    }
}

/// Pass-through plane: geographic coordinates are already planar. Used by
/// tests and by callers that pre-project their control points.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct IdentityProjection;

impl Projection for IdentityProjection {
    fn project(&self, lon_lat: Point) -> Point {
        lon_lat
    }

    fn unproject(&self, projected: Point) -> Point {
        projected
    }
}

#[cfg(test)]
mod tests {
    use super::{MERCATOR_MAX_LAT_DEG, MERCATOR_R, Projection, WebMercator};
    use crate::geometry::Point;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn origin_projects_to_origin() {
        let p = WebMercator.project(Point::new(0.0, 0.0));
        assert_close(p.x, 0.0, 1e-9);
        assert_close(p.y, 0.0, 1e-9);
    }

    #[test]
    fn mercator_domain_edge_is_square() {
        // At the maximum latitude, y equals x at lon 180: the world is square.
        let p = WebMercator.project(Point::new(180.0, MERCATOR_MAX_LAT_DEG));
        assert_close(p.x, std::f64::consts::PI * MERCATOR_R, 1e-3);
        assert_close(p.y, std::f64::consts::PI * MERCATOR_R, 1e-3);
    }

    #[test]
    fn round_trip() {
        let lon_lat = Point::new(4.899, 52.372); // Amsterdam
        let rt = WebMercator.unproject(WebMercator.project(lon_lat));
        assert_close(rt.x, lon_lat.x, 1e-9);
        assert_close(rt.y, lon_lat.y, 1e-9);
    }

    #[test]
    fn latitude_is_clamped() {
        let a = WebMercator.project(Point::new(0.0, 89.9));
        let b = WebMercator.project(Point::new(0.0, MERCATOR_MAX_LAT_DEG));
        assert_close(a.y, b.y, 1e-9);
    }
}
