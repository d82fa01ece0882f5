use std::fmt::Write;

use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

use crate::errors::{Result, VirtualLayerError};

/// Parses a WKT string. `EMPTY` geometries parse to `None`; Z and M
/// ordinates are accepted and dropped.
pub fn parse_wkt(wkt: &str) -> Result<Option<Geometry<f64>>> {
    let mut parser = Parser {
        tokens: tokenize(wkt)?,
        pos: 0,
    };
    let geometry = parser.geometry()?;
    if parser.pos != parser.tokens.len() {
        return Err(VirtualLayerError::InvalidWkt(format!(
            "unexpected trailing input in '{wkt}'"
        )));
    }
    Ok(geometry)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Open,
    Close,
    Comma,
}

fn tokenize(s: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = s.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !c.is_ascii_alphabetic() {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(s[start..end].to_ascii_uppercase()));
            }
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let number = s[start..end].parse().map_err(|_| {
                    VirtualLayerError::InvalidWkt(format!("invalid number '{}'", &s[start..end]))
                })?;
                tokens.push(Token::Number(number));
            }
            c => {
                return Err(VirtualLayerError::InvalidWkt(format!(
                    "unexpected character '{c}'"
                )))
            }
        }
    }
    Ok(tokens)
}

const TAGS: [&str; 7] = [
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| VirtualLayerError::InvalidWkt("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next()?;
        if token != expected {
            return Err(VirtualLayerError::InvalidWkt(format!(
                "expected {expected:?}, found {token:?}"
            )));
        }
        Ok(())
    }

    /// Consumes an optional dimension tag and `EMPTY`; returns true when empty.
    fn prelude(&mut self) -> Result<bool> {
        if let Some(Token::Word(w)) = self.peek() {
            if matches!(w.as_str(), "Z" | "M" | "ZM") {
                self.pos += 1;
            }
        }
        if let Some(Token::Word(w)) = self.peek() {
            if w == "EMPTY" {
                self.pos += 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect(Token::Open)?;
        let mut items = vec![item(self)?];
        loop {
            match self.next()? {
                Token::Comma => items.push(item(self)?),
                Token::Close => return Ok(items),
                t => {
                    return Err(VirtualLayerError::InvalidWkt(format!(
                        "expected ',' or ')', found {t:?}"
                    )))
                }
            }
        }
    }

    fn coord(&mut self) -> Result<Coord<f64>> {
        let mut ordinates = Vec::with_capacity(4);
        while let Some(Token::Number(n)) = self.peek() {
            ordinates.push(*n);
            self.pos += 1;
        }
        match ordinates.as_slice() {
            [x, y, ..] if ordinates.len() <= 4 => Ok(Coord { x: *x, y: *y }),
            _ => Err(VirtualLayerError::InvalidWkt(format!(
                "a coordinate needs 2 to 4 ordinates, found {}",
                ordinates.len()
            ))),
        }
    }

    fn line_string(&mut self) -> Result<LineString<f64>> {
        Ok(LineString(self.list(Self::coord)?))
    }

    fn polygon(&mut self) -> Result<Polygon<f64>> {
        let mut rings = self.list(Self::line_string)?.into_iter();
        let exterior = rings.next().unwrap_or_else(|| LineString(vec![]));
        Ok(Polygon::new(exterior, rings.collect()))
    }

    fn multi_point_member(&mut self) -> Result<Point<f64>> {
        // both "MULTIPOINT (1 2, 3 4)" and "MULTIPOINT ((1 2), (3 4))"
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let c = self.coord()?;
            self.expect(Token::Close)?;
            Ok(Point(c))
        } else {
            Ok(Point(self.coord()?))
        }
    }

    fn geometry(&mut self) -> Result<Option<Geometry<f64>>> {
        let tag = match self.next()? {
            Token::Word(w) => w,
            t => {
                return Err(VirtualLayerError::InvalidWkt(format!(
                    "expected a geometry tag, found {t:?}"
                )))
            }
        };
        // "POINTZ" style tags carry the dimension suffix inline
        let stripped = ["ZM", "Z", "M"]
            .iter()
            .filter_map(|suffix| tag.strip_suffix(suffix))
            .find(|t| TAGS.contains(t))
            .map(str::to_string);
        let tag = stripped.unwrap_or(tag);
        if self.prelude()? {
            return Ok(None);
        }
        let geometry = match tag.as_str() {
            "POINT" => {
                self.expect(Token::Open)?;
                let c = self.coord()?;
                self.expect(Token::Close)?;
                Geometry::Point(Point(c))
            }
            "LINESTRING" => Geometry::LineString(self.line_string()?),
            "POLYGON" => Geometry::Polygon(self.polygon()?),
            "MULTIPOINT" => Geometry::MultiPoint(MultiPoint(self.list(Self::multi_point_member)?)),
            "MULTILINESTRING" => {
                Geometry::MultiLineString(MultiLineString(self.list(Self::line_string)?))
            }
            "MULTIPOLYGON" => Geometry::MultiPolygon(MultiPolygon(self.list(Self::polygon)?)),
            "GEOMETRYCOLLECTION" => {
                let members = self.list(Self::geometry)?;
                Geometry::GeometryCollection(GeometryCollection(
                    members.into_iter().flatten().collect(),
                ))
            }
            other => {
                return Err(VirtualLayerError::InvalidWkt(format!(
                    "unknown geometry type '{other}'"
                )))
            }
        };
        Ok(Some(geometry))
    }
}

/// Formats `geometry` as 2D WKT.
pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    let mut out = String::new();
    write_geometry(geometry, &mut out);
    out
}

fn write_coords(coords: &[Coord<f64>], out: &mut String) {
    out.push('(');
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{} {}", c.x, c.y);
    }
    out.push(')');
}

fn write_polygon_body(p: &Polygon<f64>, out: &mut String) {
    out.push('(');
    write_coords(&p.exterior().0, out);
    for ring in p.interiors() {
        out.push(',');
        write_coords(&ring.0, out);
    }
    out.push(')');
}

fn write_geometry(geometry: &Geometry<f64>, out: &mut String) {
    match geometry {
        Geometry::Point(p) => {
            out.push_str("POINT");
            write_coords(&[p.0], out);
        }
        Geometry::Line(l) => {
            out.push_str("LINESTRING");
            write_coords(&[l.start, l.end], out);
        }
        Geometry::LineString(ls) => {
            out.push_str("LINESTRING");
            write_coords(&ls.0, out);
        }
        Geometry::Polygon(p) => {
            out.push_str("POLYGON");
            write_polygon_body(p, out);
        }
        Geometry::Rect(r) => write_geometry(&Geometry::Polygon(r.to_polygon()), out),
        Geometry::Triangle(t) => write_geometry(&Geometry::Polygon(t.to_polygon()), out),
        Geometry::MultiPoint(mp) => {
            out.push_str("MULTIPOINT");
            let coords: Vec<_> = mp.0.iter().map(|p| p.0).collect();
            write_coords(&coords, out);
        }
        Geometry::MultiLineString(mls) => {
            out.push_str("MULTILINESTRING(");
            for (i, ls) in mls.0.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_coords(&ls.0, out);
            }
            out.push(')');
        }
        Geometry::MultiPolygon(mp) => {
            out.push_str("MULTIPOLYGON(");
            for (i, p) in mp.0.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_polygon_body(p, out);
            }
            out.push(')');
        }
        Geometry::GeometryCollection(gc) => {
            out.push_str("GEOMETRYCOLLECTION(");
            for (i, g) in gc.0.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_geometry(g, out);
            }
            out.push(')');
        }
    }
}
