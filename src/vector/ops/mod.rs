use geo_types::{Coord, Geometry, Rect};

pub mod conversions;
pub mod predicates;

/// Bounding rectangle of `geometry`, `None` when it has no coordinates.
pub fn envelope(geometry: &Geometry<f64>) -> Option<Rect<f64>> {
    let mut bounds: Option<(Coord<f64>, Coord<f64>)> = None;
    visit_coords(geometry, &mut |c| {
        bounds = Some(match bounds {
            None => (c, c),
            Some((min, max)) => (
                Coord {
                    x: min.x.min(c.x),
                    y: min.y.min(c.y),
                },
                Coord {
                    x: max.x.max(c.x),
                    y: max.y.max(c.y),
                },
            ),
        });
    });
    bounds.map(|(min, max)| Rect::new(min, max))
}

fn visit_coords(geometry: &Geometry<f64>, f: &mut impl FnMut(Coord<f64>)) {
    match geometry {
        Geometry::Point(p) => f(p.0),
        Geometry::Line(l) => {
            f(l.start);
            f(l.end);
        }
        Geometry::LineString(ls) => ls.0.iter().copied().for_each(f),
        Geometry::Polygon(p) => p.exterior().0.iter().copied().for_each(f),
        Geometry::Rect(r) => {
            f(r.min());
            f(r.max());
        }
        Geometry::Triangle(t) => t.to_array().into_iter().for_each(f),
        Geometry::MultiPoint(mp) => mp.0.iter().for_each(|p| f(p.0)),
        Geometry::MultiLineString(mls) => mls.0.iter().flat_map(|l| l.0.iter()).copied().for_each(f),
        Geometry::MultiPolygon(mp) => mp
            .0
            .iter()
            .flat_map(|p| p.exterior().0.iter())
            .copied()
            .for_each(f),
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                visit_coords(g, f);
            }
        }
    }
}
