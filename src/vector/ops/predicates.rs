use geo_types::{Coord, Geometry, LineString, Polygon, Rect};

use super::envelope;

/// Tests if two geometries share at least one point.
///
/// Boundaries count: a point on a polygon ring intersects the polygon.
pub fn intersects(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    match (envelope(a), envelope(b)) {
        (Some(ea), Some(eb)) if rects_intersect(&ea, &eb) => {}
        _ => return false,
    }
    let (pa, pb) = (Parts::of(a), Parts::of(b));
    pa.intersects(&pb)
}

/// Negation of [`intersects`].
pub fn disjoint(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    !intersects(a, b)
}

/// Closed rectangle overlap test.
pub fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x
        && b.min().x <= a.max().x
        && a.min().y <= b.max().y
        && b.min().y <= a.max().y
}

/// Geometry flattened into its primitive parts.
#[derive(Default)]
struct Parts<'a> {
    points: Vec<Coord<f64>>,
    lines: Vec<&'a [Coord<f64>]>,
    polygons: Vec<&'a Polygon<f64>>,
    owned: Vec<Polygon<f64>>,
    owned_lines: Vec<LineString<f64>>,
}

impl<'a> Parts<'a> {
    fn of(geometry: &'a Geometry<f64>) -> Self {
        let mut parts = Parts::default();
        parts.collect(geometry);
        parts
    }

    fn collect(&mut self, geometry: &'a Geometry<f64>) {
        match geometry {
            Geometry::Point(p) => self.points.push(p.0),
            Geometry::MultiPoint(mp) => self.points.extend(mp.0.iter().map(|p| p.0)),
            Geometry::Line(l) => self
                .owned_lines
                .push(LineString(vec![l.start, l.end])),
            Geometry::LineString(ls) => self.lines.push(&ls.0),
            Geometry::MultiLineString(mls) => self.lines.extend(mls.0.iter().map(|l| &l.0[..])),
            Geometry::Polygon(p) => self.polygons.push(p),
            Geometry::MultiPolygon(mp) => self.polygons.extend(mp.0.iter()),
            Geometry::Rect(r) => self.owned.push(r.to_polygon()),
            Geometry::Triangle(t) => self.owned.push(t.to_polygon()),
            Geometry::GeometryCollection(gc) => {
                for g in &gc.0 {
                    self.collect(g);
                }
            }
        }
    }

    fn all_lines(&self) -> impl Iterator<Item = &[Coord<f64>]> {
        self.lines
            .iter()
            .map(|l| &l[..])
            .chain(self.owned_lines.iter().map(|l| &l.0[..]))
    }

    fn all_polygons(&self) -> impl Iterator<Item = &Polygon<f64>> {
        self.polygons.iter().map(|p| &**p).chain(self.owned.iter())
    }

    fn intersects(&self, other: &Parts<'_>) -> bool {
        for &p in &self.points {
            if other.contains_point(p) {
                return true;
            }
        }
        for &p in &other.points {
            if self.contains_point(p) {
                return true;
            }
        }
        for line in self.all_lines() {
            if other.touches_path(line) {
                return true;
            }
        }
        for line in other.all_lines() {
            if self.touches_path(line) {
                return true;
            }
        }
        for poly in self.all_polygons() {
            if other.touches_polygon(poly) {
                return true;
            }
        }
        false
    }

    fn contains_point(&self, p: Coord<f64>) -> bool {
        self.points.iter().any(|&q| q == p)
            || self.all_lines().any(|line| point_on_path(p, line))
            || self.all_polygons().any(|poly| point_in_polygon(p, poly))
    }

    /// Whether an open path touches any line or polygon of `self`.
    fn touches_path(&self, path: &[Coord<f64>]) -> bool {
        self.all_lines().any(|line| paths_cross(path, line))
            || self.all_polygons().any(|poly| {
                rings(poly).any(|ring| paths_cross(path, &ring.0))
                    || path.first().is_some_and(|&c| point_in_polygon(c, poly))
            })
    }

    fn touches_polygon(&self, poly: &Polygon<f64>) -> bool {
        self.all_polygons().any(|other| {
            rings(poly).any(|a| rings(other).any(|b| paths_cross(&a.0, &b.0)))
                || other.exterior().0.first().is_some_and(|&c| point_in_polygon(c, poly))
                || poly.exterior().0.first().is_some_and(|&c| point_in_polygon(c, other))
        })
    }
}

fn rings(poly: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(poly.exterior()).chain(poly.interiors().iter())
}

fn orientation(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> bool {
    orientation(a, b, p) == 0.0
        && p.x >= a.x.min(b.x)
        && p.x <= a.x.max(b.x)
        && p.y >= a.y.min(b.y)
        && p.y <= a.y.max(b.y)
}

fn segments_intersect(p1: Coord<f64>, p2: Coord<f64>, q1: Coord<f64>, q2: Coord<f64>) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    on_segment(p1, q1, q2) || on_segment(p2, q1, q2) || on_segment(q1, p1, p2) || on_segment(q2, p1, p2)
}

fn segments(path: &[Coord<f64>]) -> impl Iterator<Item = (Coord<f64>, Coord<f64>)> + '_ {
    path.windows(2).map(|w| (w[0], w[1]))
}

fn paths_cross(a: &[Coord<f64>], b: &[Coord<f64>]) -> bool {
    if a.len() == 1 {
        return point_on_path(a[0], b);
    }
    if b.len() == 1 {
        return point_on_path(b[0], a);
    }
    segments(a).any(|(p1, p2)| segments(b).any(|(q1, q2)| segments_intersect(p1, p2, q1, q2)))
}

fn point_on_path(p: Coord<f64>, path: &[Coord<f64>]) -> bool {
    match path {
        [] => false,
        [only] => *only == p,
        _ => segments(path).any(|(a, b)| on_segment(p, a, b)),
    }
}

/// Even-odd test on a single ring; points on the ring count as inside.
fn point_in_ring(p: Coord<f64>, ring: &[Coord<f64>]) -> bool {
    if point_on_path(p, ring) {
        return true;
    }
    let mut inside = false;
    for (a, b) in segments(ring) {
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn point_in_polygon(p: Coord<f64>, poly: &Polygon<f64>) -> bool {
    if !point_in_ring(p, &poly.exterior().0) {
        return false;
    }
    // inside a hole but not on its boundary
    !poly
        .interiors()
        .iter()
        .any(|hole| point_in_ring(p, &hole.0) && !point_on_path(p, &hole.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    fn square(min: f64, max: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
            (x: min, y: min),
        ])
    }

    #[test]
    fn test_point_polygon() {
        let sq = square(0.0, 10.0);
        assert!(intersects(&Geometry::Point(point!(x: 5.0, y: 5.0)), &sq));
        assert!(intersects(&Geometry::Point(point!(x: 10.0, y: 5.0)), &sq));
        assert!(!intersects(&Geometry::Point(point!(x: 11.0, y: 5.0)), &sq));
    }

    #[test]
    fn test_point_in_hole() {
        let donut = Geometry::Polygon(polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 4.0, y: 4.0), (x: 6.0, y: 4.0), (x: 6.0, y: 6.0), (x: 4.0, y: 6.0)]],
        ));
        assert!(!intersects(&Geometry::Point(point!(x: 5.0, y: 5.0)), &donut));
        assert!(intersects(&Geometry::Point(point!(x: 4.0, y: 5.0)), &donut));
        assert!(intersects(&Geometry::Point(point!(x: 2.0, y: 2.0)), &donut));
    }

    #[test]
    fn test_lines() {
        let a = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 10.0)]);
        let b = Geometry::LineString(line_string![(x: 0.0, y: 10.0), (x: 10.0, y: 0.0)]);
        let c = Geometry::LineString(line_string![(x: 0.0, y: 1.0), (x: 9.0, y: 10.0)]);
        assert!(intersects(&a, &b));
        assert!(disjoint(&a, &c));
    }

    #[test]
    fn test_polygon_containment() {
        assert!(intersects(&square(0.0, 10.0), &square(2.0, 3.0)));
        assert!(intersects(&square(2.0, 3.0), &square(0.0, 10.0)));
        assert!(intersects(&square(0.0, 2.0), &square(2.0, 4.0)));
        assert!(!intersects(&square(0.0, 1.0), &square(2.0, 4.0)));
    }

    #[test]
    fn test_envelope_overlap_but_disjoint() {
        let diagonal = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 10.0)]);
        let corner = Geometry::Point(point!(x: 9.0, y: 1.0));
        assert!(!intersects(&diagonal, &corner));
    }
}
