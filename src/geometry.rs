use geojson::{Geometry, PolygonType, Value};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn to_wkt(self: &Self) -> String {
        format!("POINT({} {})", self.lon, self.lat)
    }

    /// Parses the `POINT(lon lat)` text BigQuery returns for GEOGRAPHY values.
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let inner = wkt
            .trim()
            .strip_prefix("POINT")?
            .trim()
            .strip_prefix('(')?
            .strip_suffix(')')?;
        let mut coords = inner.split_whitespace();
        let lon = coords.next()?.parse().ok()?;
        let lat = coords.next()?.parse().ok()?;
        if coords.next().is_some() {
            return None;
        }
        Some(Self { lon, lat })
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

fn collect_polygons<'a>(geometry: &'a Geometry, polygons: &mut Vec<&'a PolygonType>) {
    match &geometry.value {
        Value::Polygon(polygon) => polygons.push(polygon),
        Value::MultiPolygon(multi) => polygons.extend(multi.iter()),
        Value::GeometryCollection(members) => {
            for member in members {
                collect_polygons(member, polygons);
            }
        }
        _ => {}
    }
}

/// Area-weighted planar centroid of a footprint's polygons in lon/lat.
///
/// Footprints wider than 180 degrees of longitude are assumed to cross the
/// antimeridian and are unwrapped to [0, 360) before averaging. Geometries
/// without polygons have no centroid.
pub fn centroid(geometry: &Geometry) -> Option<Point> {
    let mut polygons = vec![];
    collect_polygons(geometry, &mut polygons);
    let vertices: Vec<(f64, f64)> = polygons
        .iter()
        .flat_map(|p| p.iter())
        .flat_map(|ring| ring.iter())
        .filter_map(|c| Some((*c.first()?, *c.get(1)?)))
        .collect();
    if vertices.is_empty() {
        return None;
    }

    let (min_lon, max_lon) = vertices
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), (x, _)| (lo.min(*x), hi.max(*x)));
    let unwrap = max_lon - min_lon > 180.0;
    let shift = |x: f64| if unwrap && x < 0.0 { x + 360.0 } else { x };

    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for polygon in polygons {
        for (i, ring) in polygon.iter().enumerate() {
            let ring: Vec<(f64, f64)> = ring
                .iter()
                .filter_map(|c| Some((shift(*c.first()?), *c.get(1)?)))
                .collect();
            let (a, x, y) = ring_moments(&ring);
            // Holes subtract from the exterior regardless of winding order
            let sign = if i == 0 { a.signum() } else { -a.signum() };
            area += sign * a;
            cx += sign * x;
            cy += sign * y;
        }
    }

    let (lon, lat) = if area.abs() > f64::EPSILON {
        (cx / (3.0 * area), cy / (3.0 * area))
    } else {
        let n = vertices.len() as f64;
        let lon = vertices.iter().map(|(x, _)| shift(*x)).sum::<f64>() / n;
        let lat = vertices.iter().map(|(_, y)| *y).sum::<f64>() / n;
        (lon, lat)
    };

    Some(Point::new(normalize_lon(lon), lat))
}

/// Twice the signed area of a ring and its first moments (shoelace).
fn ring_moments(ring: &[(f64, f64)]) -> (f64, f64, f64) {
    let mut a = 0.0;
    let mut x = 0.0;
    let mut y = 0.0;
    if ring.len() < 3 {
        return (a, x, y);
    }
    for i in 0..ring.len() {
        let (x0, y0) = ring[i];
        let (x1, y1) = ring[(i + 1) % ring.len()];
        let cross = x0 * y1 - x1 * y0;
        a += cross;
        x += (x0 + x1) * cross;
        y += (y0 + y1) * cross;
    }
    (a, x, y)
}

fn normalize_lon(lon: f64) -> f64 {
    let lon = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if lon == 180.0 {
        -180.0
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Vec<f64>> {
        vec![
            vec![x0, y0],
            vec![x1, y0],
            vec![x1, y1],
            vec![x0, y1],
            vec![x0, y0],
        ]
    }

    fn polygon(rings: Vec<Vec<Vec<f64>>>) -> Geometry {
        Geometry::new(Value::Polygon(rings))
    }

    fn close(a: Point, b: Point) -> bool {
        (a.lon - b.lon).abs() < 1e-9 && (a.lat - b.lat).abs() < 1e-9
    }

    #[test]
    fn test_square_centroid() {
        let footprint = polygon(vec![square(-122.0, 37.0, -120.0, 39.0)]);
        assert!(close(centroid(&footprint).unwrap(), Point::new(-121.0, 38.0)));
    }

    #[test]
    fn test_winding_order_does_not_matter() {
        let mut ring = square(10.0, 10.0, 14.0, 12.0);
        ring.reverse();
        assert!(close(centroid(&polygon(vec![ring])).unwrap(), Point::new(12.0, 11.0)));
    }

    #[test]
    fn test_hole_shifts_centroid() {
        let footprint = polygon(vec![square(0.0, 0.0, 4.0, 4.0), square(0.0, 0.0, 2.0, 4.0)]);
        assert!(close(centroid(&footprint).unwrap(), Point::new(3.0, 2.0)));
    }

    #[test]
    fn test_antimeridian_footprint() {
        let footprint = Geometry::new(Value::MultiPolygon(vec![
            vec![square(179.0, -17.0, 180.0, -16.0)],
            vec![square(-180.0, -17.0, -179.0, -16.0)],
        ]));
        let centroid = centroid(&footprint).unwrap();
        assert!(centroid.lon.abs() > 179.9, "{centroid}");
        assert!((centroid.lat + 16.5).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_footprint() {
        let line = polygon(vec![vec![vec![5.0, 5.0], vec![7.0, 5.0]]]);
        assert!(close(centroid(&line).unwrap(), Point::new(6.0, 5.0)));

        assert!(centroid(&polygon(vec![])).is_none());
        assert!(centroid(&Geometry::new(Value::Point(vec![1.0, 2.0]))).is_none());
    }

    #[test]
    fn test_deserialize_geojson() {
        let json = r#"{"type": "Polygon", "coordinates": [[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]]}"#;
        let footprint: Geometry = serde_json::from_str(json).unwrap();
        assert!(close(centroid(&footprint).unwrap(), Point::new(1.0, 1.0)));
    }

    #[test]
    fn test_wkt() {
        let point = Point::new(-121.5, 38.25);
        assert_eq!(point.to_wkt(), "POINT(-121.5 38.25)");
        assert_eq!(Point::from_wkt("POINT(-121.5 38.25)"), Some(point));
        assert_eq!(Point::from_wkt("POINT (1 2)"), Some(Point::new(1.0, 2.0)));
        assert_eq!(Point::from_wkt("POLYGON((0 0, 1 1))"), None);
        assert_eq!(Point::from_wkt("POINT(1)"), None);
    }
}
