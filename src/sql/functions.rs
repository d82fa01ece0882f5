//! Spatial SQL functions over geometry blobs.
//!
//! Every function answers SQL `NULL` when an argument is not a usable
//! geometry or number, so a bad value never aborts a query.

use geo_types::{Geometry, Point, Rect};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::errors::Result;
use crate::vector::ops::conversions::{decode_blob, encode_blob, parse_wkt, read_header, to_wkt};
use crate::vector::ops::predicates::{disjoint, intersects, rects_intersect};

type SqlResult<T> = rusqlite::Result<T>;

/// Registers the spatial function set on `conn`.
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("MakePoint", -1, flags, make_point)?;
    conn.create_scalar_function("BuildMbr", -1, flags, build_mbr)?;
    conn.create_scalar_function("GeomFromText", -1, flags, geom_from_text)?;
    conn.create_scalar_function("AsText", 1, flags, as_text)?;
    conn.create_scalar_function("X", 1, flags, x)?;
    conn.create_scalar_function("Y", 1, flags, y)?;
    conn.create_scalar_function("Srid", 1, flags, srid)?;
    conn.create_scalar_function("SetSrid", 2, flags, set_srid)?;
    conn.create_scalar_function("GeometryType", 1, flags, geometry_type)?;
    conn.create_scalar_function("MbrMinX", 1, flags, |ctx| mbr_part(ctx, |r| r.min().x))?;
    conn.create_scalar_function("MbrMinY", 1, flags, |ctx| mbr_part(ctx, |r| r.min().y))?;
    conn.create_scalar_function("MbrMaxX", 1, flags, |ctx| mbr_part(ctx, |r| r.max().x))?;
    conn.create_scalar_function("MbrMaxY", 1, flags, |ctx| mbr_part(ctx, |r| r.max().y))?;
    conn.create_scalar_function("MbrIntersects", 2, flags, mbr_intersects)?;
    conn.create_scalar_function("Intersects", 2, flags, |ctx| {
        binary_predicate(ctx, intersects)
    })?;
    conn.create_scalar_function("Disjoint", 2, flags, |ctx| binary_predicate(ctx, disjoint))?;
    conn.create_scalar_function("BboxIntersects", -1, flags, bbox_intersects)?;
    Ok(())
}

fn blob_arg<'a>(ctx: &'a Context<'_>, idx: usize) -> Option<&'a [u8]> {
    if idx >= ctx.len() {
        return None;
    }
    match ctx.get_raw(idx) {
        ValueRef::Blob(b) => Some(b),
        _ => None,
    }
}

fn number_arg(ctx: &Context<'_>, idx: usize) -> Option<f64> {
    if idx >= ctx.len() {
        return None;
    }
    match ctx.get_raw(idx) {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(r) => Some(r),
        _ => None,
    }
}

fn int_arg(ctx: &Context<'_>, idx: usize) -> Option<i32> {
    if idx >= ctx.len() {
        return None;
    }
    match ctx.get_raw(idx) {
        ValueRef::Integer(i) => i32::try_from(i).ok(),
        _ => None,
    }
}

fn geometry_arg(ctx: &Context<'_>, idx: usize) -> Option<Geometry<f64>> {
    decode_blob(blob_arg(ctx, idx)?).ok().flatten()
}

/// Reads `minx, miny, maxx, maxy` starting at `idx`.
fn rect_args(ctx: &Context<'_>, idx: usize) -> Option<Rect<f64>> {
    let v = [
        number_arg(ctx, idx)?,
        number_arg(ctx, idx + 1)?,
        number_arg(ctx, idx + 2)?,
        number_arg(ctx, idx + 3)?,
    ];
    Some(Rect::new((v[0], v[1]), (v[2], v[3])))
}

/// `MakePoint(x, y [, srid])`
fn make_point(ctx: &Context<'_>) -> SqlResult<Option<Vec<u8>>> {
    let (Some(x), Some(y)) = (number_arg(ctx, 0), number_arg(ctx, 1)) else {
        return Ok(None);
    };
    let srid = int_arg(ctx, 2).unwrap_or(0);
    Ok(Some(encode_blob(&Geometry::Point(Point::new(x, y)), srid)))
}

/// `BuildMbr(x1, y1, x2, y2 [, srid])`
fn build_mbr(ctx: &Context<'_>) -> SqlResult<Option<Vec<u8>>> {
    let Some(rect) = rect_args(ctx, 0) else {
        return Ok(None);
    };
    let srid = int_arg(ctx, 4).unwrap_or(0);
    Ok(Some(encode_blob(&Geometry::Polygon(rect.to_polygon()), srid)))
}

/// `GeomFromText(wkt [, srid])`
fn geom_from_text(ctx: &Context<'_>) -> SqlResult<Option<Vec<u8>>> {
    if ctx.len() == 0 {
        return Ok(None);
    }
    let wkt = match ctx.get_raw(0) {
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        _ => return Ok(None),
    };
    let srid = int_arg(ctx, 1).unwrap_or(0);
    Ok(parse_wkt(&wkt)
        .ok()
        .flatten()
        .map(|g| encode_blob(&g, srid)))
}

fn as_text(ctx: &Context<'_>) -> SqlResult<Option<String>> {
    Ok(geometry_arg(ctx, 0).map(|g| to_wkt(&g)))
}

fn point_arg(ctx: &Context<'_>) -> Option<Point<f64>> {
    match geometry_arg(ctx, 0)? {
        Geometry::Point(p) => Some(p),
        _ => None,
    }
}

fn x(ctx: &Context<'_>) -> SqlResult<Option<f64>> {
    Ok(point_arg(ctx).map(|p| p.x()))
}

fn y(ctx: &Context<'_>) -> SqlResult<Option<f64>> {
    Ok(point_arg(ctx).map(|p| p.y()))
}

fn srid(ctx: &Context<'_>) -> SqlResult<Option<i64>> {
    Ok(blob_arg(ctx, 0)
        .and_then(|b| read_header(b).ok())
        .map(|h| h.srid as i64))
}

/// `SetSrid(geom, srid)` rewrites the srid stored in the blob header.
fn set_srid(ctx: &Context<'_>) -> SqlResult<Option<Vec<u8>>> {
    let (Some(blob), Some(srid)) = (blob_arg(ctx, 0), int_arg(ctx, 1)) else {
        return Ok(None);
    };
    if read_header(blob).is_err() {
        return Ok(None);
    }
    let mut blob = blob.to_vec();
    let bytes = if blob[1] == 0x01 {
        srid.to_le_bytes()
    } else {
        srid.to_be_bytes()
    };
    blob[2..6].copy_from_slice(&bytes);
    Ok(Some(blob))
}

fn geometry_type(ctx: &Context<'_>) -> SqlResult<Option<String>> {
    Ok(blob_arg(ctx, 0)
        .and_then(|b| read_header(b).ok())
        .map(|h| h.geometry_type.name().to_ascii_uppercase()))
}

fn mbr_part(ctx: &Context<'_>, part: impl Fn(&Rect<f64>) -> f64) -> SqlResult<Option<f64>> {
    Ok(blob_arg(ctx, 0)
        .and_then(|b| read_header(b).ok())
        .map(|h| part(&h.mbr)))
}

fn mbr_intersects(ctx: &Context<'_>) -> SqlResult<Option<bool>> {
    let a = blob_arg(ctx, 0).and_then(|b| read_header(b).ok());
    let b = blob_arg(ctx, 1).and_then(|b| read_header(b).ok());
    Ok(match (a, b) {
        (Some(a), Some(b)) => Some(rects_intersect(&a.mbr, &b.mbr)),
        _ => None,
    })
}

fn binary_predicate(
    ctx: &Context<'_>,
    predicate: fn(&Geometry<f64>, &Geometry<f64>) -> bool,
) -> SqlResult<Option<bool>> {
    Ok(match (geometry_arg(ctx, 0), geometry_arg(ctx, 1)) {
        (Some(a), Some(b)) => Some(predicate(&a, &b)),
        _ => None,
    })
}

/// `BboxIntersects(geom, minx, miny, maxx, maxy [, srid])`: bounding box of
/// `geom` against the rectangle.
fn bbox_intersects(ctx: &Context<'_>) -> SqlResult<Option<bool>> {
    let header = blob_arg(ctx, 0).and_then(|b| read_header(b).ok());
    Ok(match (header, rect_args(ctx, 1)) {
        (Some(h), Some(rect)) => Some(rects_intersect(&h.mbr, &rect)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_spatial_functions(&conn).unwrap();
        conn
    }

    fn query<T: rusqlite::types::FromSql>(conn: &Connection, sql: &str) -> T {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_point_accessors() {
        let conn = conn();
        let x: f64 = query(&conn, "SELECT X(MakePoint(1.5, 2))");
        let y: f64 = query(&conn, "SELECT Y(MakePoint(1.5, 2))");
        let srid: i64 = query(&conn, "SELECT Srid(MakePoint(1.5, 2, 4326))");
        assert_eq!((x, y, srid), (1.5, 2.0, 4326));
        let srid: i64 = query(&conn, "SELECT Srid(SetSrid(MakePoint(0, 0), 2154))");
        assert_eq!(srid, 2154);
    }

    #[test]
    fn test_wkt() {
        let conn = conn();
        let wkt: String = query(&conn, "SELECT AsText(GeomFromText('LINESTRING(0 0, 2 1)'))");
        assert_eq!(wkt, "LINESTRING(0 0,2 1)");
        let kind: String = query(&conn, "SELECT GeometryType(BuildMbr(0, 0, 1, 1))");
        assert_eq!(kind, "POLYGON");
        let max_x: f64 = query(&conn, "SELECT MbrMaxX(GeomFromText('LINESTRING(0 0, 2 1)'))");
        assert_eq!(max_x, 2.0);
    }

    #[test]
    fn test_predicates() {
        let conn = conn();
        let hit: bool = query(&conn, "SELECT Intersects(MakePoint(1, 1), BuildMbr(0, 0, 2, 2))");
        let miss: bool = query(&conn, "SELECT Disjoint(MakePoint(3, 1), BuildMbr(0, 0, 2, 2))");
        let bbox: bool = query(&conn, "SELECT BboxIntersects(MakePoint(1, 1), 0, 0, 2, 2, 4326)");
        let mbr: bool = query(&conn, "SELECT MbrIntersects(BuildMbr(0, 0, 2, 2), BuildMbr(2, 2, 3, 3))");
        assert!(hit && miss && bbox && mbr);
    }

    #[test]
    fn test_invalid_input_is_null() {
        let conn = conn();
        for sql in [
            "SELECT GeomFromText('NOT WKT')",
            "SELECT X('abc')",
            "SELECT AsText(x'0001')",
            "SELECT Intersects(NULL, MakePoint(0, 0))",
            "SELECT BboxIntersects(MakePoint(0, 0), 'a', 0, 1, 1)",
            "SELECT MakePoint(1)",
        ] {
            let v: Value = query(&conn, sql);
            assert_eq!(v, Value::Null, "{sql}");
        }
    }

    #[test]
    fn test_oversized_member_count_is_null() {
        let conn = conn();
        let multi = encode_blob(
            &Geometry::MultiPoint(vec![Point::new(1.0, 2.0)].into()),
            0,
        );
        // member count right after the geometry type
        let mut blob = multi[..43].to_vec();
        blob.extend_from_slice(&u32::MAX.to_le_bytes());
        blob.push(0xFE);
        let v: Value = conn
            .query_row("SELECT AsText(?1)", [&blob], |row| row.get(0))
            .unwrap();
        assert_eq!(v, Value::Null);
    }
}
