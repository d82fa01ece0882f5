use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, VirtualLayerError};

/// Geometry kind of a layer or a geometry column.
///
/// The discriminants are the WKB type codes; [`GeometryType::NoGeometry`]
/// marks a layer without any geometry column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GeometryType {
    #[default]
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLineString = 5,
    MultiPolygon = 6,
    GeometryCollection = 7,
    NoGeometry = 100,
}

impl GeometryType {
    pub fn wkb_code(&self) -> u32 {
        *self as u32
    }

    pub fn from_wkb_code(code: u32) -> Option<GeometryType> {
        match code {
            0 => Some(GeometryType::Unknown),
            1 => Some(GeometryType::Point),
            2 => Some(GeometryType::LineString),
            3 => Some(GeometryType::Polygon),
            4 => Some(GeometryType::MultiPoint),
            5 => Some(GeometryType::MultiLineString),
            6 => Some(GeometryType::MultiPolygon),
            7 => Some(GeometryType::GeometryCollection),
            100 => Some(GeometryType::NoGeometry),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GeometryType::Unknown => "Unknown",
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::MultiPolygon => "MultiPolygon",
            GeometryType::GeometryCollection => "GeometryCollection",
            GeometryType::NoGeometry => "NoGeometry",
        }
    }

    pub fn of(geometry: &geo_types::Geometry<f64>) -> GeometryType {
        use geo_types::Geometry::*;
        match geometry {
            Point(_) => GeometryType::Point,
            Line(_) | LineString(_) => GeometryType::LineString,
            Polygon(_) | Rect(_) | Triangle(_) => GeometryType::Polygon,
            MultiPoint(_) => GeometryType::MultiPoint,
            MultiLineString(_) => GeometryType::MultiLineString,
            MultiPolygon(_) => GeometryType::MultiPolygon,
            GeometryCollection(_) => GeometryType::GeometryCollection,
        }
    }

    /// Whether a layer declaring this type actually carries geometries.
    pub fn has_geometry(&self) -> bool {
        *self != GeometryType::NoGeometry
    }

    /// Parses the declared type of a geometry column, `GEOMETRY(<code>,<srid>)`.
    pub(crate) fn from_decl_type(decl: &str) -> Option<(GeometryType, i32)> {
        let decl = decl.trim();
        let rest = decl
            .get(..8)
            .filter(|p| p.eq_ignore_ascii_case("GEOMETRY"))
            .map(|_| decl[8..].trim())?;
        if rest.is_empty() {
            return Some((GeometryType::Unknown, 0));
        }
        let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
        let (code, srid) = inner.split_once(',')?;
        let kind = GeometryType::from_wkb_code(code.trim().parse().ok()?)?;
        Some((kind, srid.trim().parse().ok()?))
    }

    pub(crate) fn decl_type(&self, srid: i32) -> String {
        format!("GEOMETRY({},{})", self.wkb_code(), srid)
    }
}

impl FromStr for GeometryType {
    type Err = VirtualLayerError;

    /// Accepts a kind name (case-insensitive) or its numeric WKB code.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.parse::<u32>() {
            return match GeometryType::from_wkb_code(code) {
                Some(kind) if (1..=6).contains(&code) => Ok(kind),
                _ => Err(VirtualLayerError::ConfigurationError(format!(
                    "Unsupported geometry type code {code}"
                ))),
            };
        }
        match s.to_ascii_lowercase().as_str() {
            "point" => Ok(GeometryType::Point),
            "linestring" => Ok(GeometryType::LineString),
            "polygon" => Ok(GeometryType::Polygon),
            "multipoint" => Ok(GeometryType::MultiPoint),
            "multilinestring" => Ok(GeometryType::MultiLineString),
            "multipolygon" => Ok(GeometryType::MultiPolygon),
            _ => Err(VirtualLayerError::ConfigurationError(format!(
                "Unknown geometry type '{s}'"
            ))),
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
