use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

use crate::errors::{Result, VirtualLayerError};
use crate::vector::GeometryType;

/// Writes `geometry` as little-endian 2D WKB.
pub fn write_wkb(geometry: &Geometry<f64>, out: &mut Vec<u8>) {
    out.push(0x01);
    out.extend_from_slice(&GeometryType::of(geometry).wkb_code().to_le_bytes());
    match geometry {
        Geometry::Point(p) => write_coord(p.0, out),
        Geometry::Line(l) => {
            write_u32(2, out);
            write_coord(l.start, out);
            write_coord(l.end, out);
        }
        Geometry::LineString(ls) => write_line_string(ls, out),
        Geometry::Polygon(p) => write_polygon(p, out),
        Geometry::Rect(r) => write_polygon(&r.to_polygon(), out),
        Geometry::Triangle(t) => write_polygon(&t.to_polygon(), out),
        Geometry::MultiPoint(mp) => {
            write_u32(mp.0.len() as u32, out);
            for p in &mp.0 {
                write_wkb(&Geometry::Point(*p), out);
            }
        }
        Geometry::MultiLineString(mls) => {
            write_u32(mls.0.len() as u32, out);
            for ls in &mls.0 {
                out.push(0x01);
                write_u32(GeometryType::LineString.wkb_code(), out);
                write_line_string(ls, out);
            }
        }
        Geometry::MultiPolygon(mp) => {
            write_u32(mp.0.len() as u32, out);
            for p in &mp.0 {
                out.push(0x01);
                write_u32(GeometryType::Polygon.wkb_code(), out);
                write_polygon(p, out);
            }
        }
        Geometry::GeometryCollection(gc) => {
            write_u32(gc.0.len() as u32, out);
            for g in &gc.0 {
                write_wkb(g, out);
            }
        }
    }
}

fn write_u32(v: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_coord(c: Coord<f64>, out: &mut Vec<u8>) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn write_line_string(ls: &LineString<f64>, out: &mut Vec<u8>) {
    write_u32(ls.0.len() as u32, out);
    for c in &ls.0 {
        write_coord(*c, out);
    }
}

fn write_polygon(p: &Polygon<f64>, out: &mut Vec<u8>) {
    if p.exterior().0.is_empty() {
        write_u32(0, out);
        return;
    }
    write_u32(1 + p.interiors().len() as u32, out);
    write_line_string(p.exterior(), out);
    for ring in p.interiors() {
        write_line_string(ring, out);
    }
}

/// Reads one WKB geometry. Z and M ordinates are dropped.
///
/// Returns `Ok(None)` for empty geometries. Member counts are never
/// trusted for allocation; a count larger than the input fails on the
/// first missing byte.
pub fn read_wkb(wkb: &[u8]) -> Result<Option<Geometry<f64>>> {
    let mut reader = WkbReader {
        buf: wkb,
        pos: 0,
        depth: 0,
    };
    reader.geometry()
}

/// Collections nested deeper than this are rejected.
const MAX_DEPTH: usize = 32;

struct WkbReader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

#[derive(Clone, Copy)]
struct Header {
    little_endian: bool,
    kind: u32,
    dims: usize,
}

impl<'a> WkbReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.saturating_add(n);
        let bytes = self.buf.get(self.pos..end).ok_or_else(|| {
            VirtualLayerError::InvalidGeometryBlob(format!(
                "unexpected end of WKB at offset {}",
                self.pos
            ))
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self, le: bool) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(if le {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self, le: bool) -> Result<f64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(if le {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    fn header(&mut self) -> Result<Header> {
        let little_endian = match self.take(1)?[0] {
            0 => false,
            1 => true,
            b => {
                return Err(VirtualLayerError::InvalidGeometryBlob(format!(
                    "invalid byte order marker {b:#04x}"
                )))
            }
        };
        let raw = self.u32(little_endian)?;
        // EWKB flags, then ISO offsets (1000 = Z, 2000 = M, 3000 = ZM).
        let mut dims = 2;
        if raw & 0x8000_0000 != 0 {
            dims += 1;
        }
        if raw & 0x4000_0000 != 0 {
            dims += 1;
        }
        let code = raw & 0x0FFF_FFFF;
        dims += match code / 1000 {
            1 | 2 => 1,
            3 => 2,
            _ => 0,
        };
        Ok(Header {
            little_endian,
            kind: code % 1000,
            dims,
        })
    }

    fn coord(&mut self, h: Header) -> Result<Coord<f64>> {
        let x = self.f64(h.little_endian)?;
        let y = self.f64(h.little_endian)?;
        for _ in 2..h.dims {
            self.f64(h.little_endian)?;
        }
        Ok(Coord { x, y })
    }

    fn line_string(&mut self, h: Header) -> Result<LineString<f64>> {
        let n = self.u32(h.little_endian)?;
        let coords = (0..n)
            .map(|_| self.coord(h))
            .collect::<Result<Vec<_>>>()?;
        Ok(LineString(coords))
    }

    fn polygon(&mut self, h: Header) -> Result<Option<Polygon<f64>>> {
        let n = self.u32(h.little_endian)?;
        let rings = (0..n)
            .map(|_| self.line_string(h))
            .collect::<Result<Vec<_>>>()?;
        let mut rings = rings.into_iter();
        Ok(rings
            .next()
            .filter(|r| !r.0.is_empty())
            .map(|exterior| Polygon::new(exterior, rings.collect())))
    }

    fn geometry(&mut self) -> Result<Option<Geometry<f64>>> {
        if self.depth >= MAX_DEPTH {
            return Err(VirtualLayerError::InvalidGeometryBlob(
                "WKB nested too deeply".to_string(),
            ));
        }
        self.depth += 1;
        let geometry = self.geometry_body();
        self.depth -= 1;
        geometry
    }

    fn geometry_body(&mut self) -> Result<Option<Geometry<f64>>> {
        let h = self.header()?;
        let le = h.little_endian;
        let geometry = match GeometryType::from_wkb_code(h.kind) {
            Some(GeometryType::Point) => {
                let c = self.coord(h)?;
                if c.x.is_nan() && c.y.is_nan() {
                    None
                } else {
                    Some(Geometry::Point(Point(c)))
                }
            }
            Some(GeometryType::LineString) => {
                let ls = self.line_string(h)?;
                (!ls.0.is_empty()).then_some(Geometry::LineString(ls))
            }
            Some(GeometryType::Polygon) => self.polygon(h)?.map(Geometry::Polygon),
            Some(GeometryType::MultiPoint) => {
                let n = self.u32(le)?;
                let mut points = Vec::new();
                for _ in 0..n {
                    if let Some(Geometry::Point(p)) = self.geometry()? {
                        points.push(p);
                    }
                }
                (!points.is_empty()).then_some(Geometry::MultiPoint(MultiPoint(points)))
            }
            Some(GeometryType::MultiLineString) => {
                let n = self.u32(le)?;
                let mut lines = Vec::new();
                for _ in 0..n {
                    if let Some(Geometry::LineString(ls)) = self.geometry()? {
                        lines.push(ls);
                    }
                }
                (!lines.is_empty())
                    .then_some(Geometry::MultiLineString(MultiLineString(lines)))
            }
            Some(GeometryType::MultiPolygon) => {
                let n = self.u32(le)?;
                let mut polygons = Vec::new();
                for _ in 0..n {
                    if let Some(Geometry::Polygon(p)) = self.geometry()? {
                        polygons.push(p);
                    }
                }
                (!polygons.is_empty()).then_some(Geometry::MultiPolygon(MultiPolygon(polygons)))
            }
            Some(GeometryType::GeometryCollection) => {
                let n = self.u32(le)?;
                let mut members = Vec::new();
                for _ in 0..n {
                    if let Some(g) = self.geometry()? {
                        members.push(g);
                    }
                }
                (!members.is_empty())
                    .then_some(Geometry::GeometryCollection(GeometryCollection(members)))
            }
            _ => {
                return Err(VirtualLayerError::InvalidGeometryBlob(format!(
                    "unsupported WKB geometry type {}",
                    h.kind
                )))
            }
        };
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    #[test]
    fn test_point_layout() {
        let mut wkb = Vec::new();
        write_wkb(&Geometry::Point(point!(x: 1.0, y: 2.0)), &mut wkb);
        assert_eq!(wkb.len(), 21);
        assert_eq!(wkb[0], 1);
        assert_eq!(&wkb[1..5], &1u32.to_le_bytes());
        assert_eq!(&wkb[5..13], &1.0f64.to_le_bytes());
    }

    #[test]
    fn test_polygon_with_hole() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]],
        );
        let mut wkb = Vec::new();
        write_wkb(&Geometry::Polygon(poly.clone()), &mut wkb);
        assert_eq!(read_wkb(&wkb).unwrap(), Some(Geometry::Polygon(poly)));
    }

    #[test]
    fn test_big_endian_z_point() {
        let mut wkb = vec![0u8];
        wkb.extend_from_slice(&1001u32.to_be_bytes());
        for v in [3.0f64, 4.0, 5.0] {
            wkb.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(
            read_wkb(&wkb).unwrap(),
            Some(Geometry::Point(point!(x: 3.0, y: 4.0)))
        );
    }

    #[test]
    fn test_empty_and_truncated() {
        let mut wkb = Vec::new();
        write_wkb(&Geometry::LineString(line_string![]), &mut wkb);
        assert_eq!(read_wkb(&wkb).unwrap(), None);
        assert!(read_wkb(&wkb[..6]).is_err());
        assert!(read_wkb(&[2, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_oversized_counts() {
        for code in [2u32, 3, 4, 5, 6, 7] {
            let mut wkb = vec![1u8];
            wkb.extend_from_slice(&code.to_le_bytes());
            wkb.extend_from_slice(&u32::MAX.to_le_bytes());
            assert!(read_wkb(&wkb).is_err(), "type {code}");
        }
    }

    #[test]
    fn test_deep_nesting() {
        let mut wkb = Vec::new();
        for _ in 0..1000 {
            wkb.push(1u8);
            wkb.extend_from_slice(&7u32.to_le_bytes());
            wkb.extend_from_slice(&1u32.to_le_bytes());
        }
        assert!(read_wkb(&wkb).is_err());
    }
}
