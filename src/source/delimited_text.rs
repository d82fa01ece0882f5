use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{Reader, ReaderBuilder, StringRecord, StringRecordsIntoIter};
use geo_types::{Geometry, Point};
use percent_encoding::percent_decode_str;

use super::memory::{apply_request, parse_crs};
use super::{FeatureStream, Provider, SourceFeature, VectorSource};
use crate::errors::{Result, VirtualLayerError};
use crate::vector::ops::conversions::parse_wkt;
use crate::vector::{FeatureRequest, Field, FieldType, FieldValue, Fields, GeometryType};

#[derive(Clone, Copy, Debug)]
enum GeometryColumns {
    None,
    Wkt(usize),
    Xy(usize, usize),
}

#[derive(Debug)]
struct Layout {
    path: PathBuf,
    delimiter: u8,
    fields: Fields,
    /// Record column of each field.
    columns: Vec<usize>,
    geometry: GeometryColumns,
}

/// A delimited text file with a header row, read on every scan.
///
/// Attribute types are inferred from the whole file when it is opened:
/// a column is integer if every non-empty cell parses as one, real if every
/// cell parses as a number, text otherwise.
pub struct DelimitedTextSource {
    layout: Arc<Layout>,
    geometry_type: GeometryType,
    srid: i32,
    count: u64,
}

fn open_failure(path: &Path, msg: String) -> VirtualLayerError {
    VirtualLayerError::SourceOpenFailure {
        provider: "delimitedtext".to_string(),
        connection: path.display().to_string(),
        msg,
    }
}

fn reader(path: &Path, delimiter: u8) -> Result<Reader<File>> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| open_failure(path, e.to_string()))
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

#[derive(Clone, Copy, PartialEq, PartialOrd)]
enum Inferred {
    Empty,
    Integer,
    Integer64,
    Real,
    Text,
}

impl Inferred {
    fn observe(self, cell: &str) -> Inferred {
        let cell = cell.trim();
        let seen = if cell.is_empty() {
            Inferred::Empty
        } else if cell.parse::<i32>().is_ok() {
            Inferred::Integer
        } else if cell.parse::<i64>().is_ok() {
            Inferred::Integer64
        } else if cell.parse::<f64>().is_ok() {
            Inferred::Real
        } else {
            Inferred::Text
        };
        if seen > self {
            seen
        } else {
            self
        }
    }

    fn field_type(self) -> FieldType {
        match self {
            Inferred::Integer => FieldType::Integer,
            Inferred::Integer64 => FieldType::Integer64,
            Inferred::Real => FieldType::Real,
            Inferred::Empty | Inferred::Text => FieldType::String,
        }
    }
}

impl DelimitedTextSource {
    /// Opens `<path>?delimiter=<c>&wkt=<column>&crs=epsg:<srid>` or
    /// `<path>?x=<column>&y=<column>&...`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (path, params) = uri.split_once('?').unwrap_or((uri, ""));
        let path = PathBuf::from(path);
        let mut delimiter = b',';
        let (mut wkt, mut x, mut y) = (None, None, None);
        let mut srid = 0;
        for param in params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
            match key {
                "delimiter" => {
                    let c = match value.as_str() {
                        "tab" | "\\t" => '\t',
                        v => v.chars().next().ok_or_else(|| {
                            open_failure(&path, "empty delimiter".to_string())
                        })?,
                    };
                    delimiter = u8::try_from(c)
                        .ok()
                        .filter(u8::is_ascii)
                        .ok_or_else(|| open_failure(&path, format!("delimiter '{c}' is not ASCII")))?;
                }
                "wkt" => wkt = Some(value),
                "x" => x = Some(value),
                "y" => y = Some(value),
                "crs" => srid = parse_crs(&value)?,
                other => log::debug!("Ignoring delimited text parameter '{other}'"),
            }
        }

        let mut records = reader(&path, delimiter)?;
        let names: Vec<String> = records
            .headers()
            .map_err(|e| open_failure(&path, e.to_string()))?
            .iter()
            .map(|n| n.trim().to_string())
            .collect();
        if names.is_empty() {
            return Err(open_failure(&path, "missing header row".to_string()));
        }
        let column = |name: &str| {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| open_failure(&path, format!("no column named '{name}'")))
        };
        let geometry = match (&wkt, &x, &y) {
            (Some(w), None, None) => GeometryColumns::Wkt(column(w)?),
            (None, Some(x), Some(y)) => GeometryColumns::Xy(column(x)?, column(y)?),
            (None, None, None) => GeometryColumns::None,
            _ => {
                return Err(open_failure(
                    &path,
                    "use either 'wkt' or both 'x' and 'y'".to_string(),
                ))
            }
        };

        let mut inferred = vec![Inferred::Empty; names.len()];
        let mut geometry_type = match geometry {
            GeometryColumns::None => GeometryType::NoGeometry,
            GeometryColumns::Xy(..) => GeometryType::Point,
            GeometryColumns::Wkt(_) => GeometryType::Unknown,
        };
        let mut count = 0;
        for record in records.records() {
            let record = record.map_err(|e| open_failure(&path, e.to_string()))?;
            if is_blank(&record) {
                continue;
            }
            count += 1;
            for (state, cell) in inferred.iter_mut().zip(record.iter()) {
                *state = state.observe(cell);
            }
            if let (GeometryColumns::Wkt(w), GeometryType::Unknown) = (geometry, geometry_type) {
                if let Some(Ok(Some(g))) = record.get(w).map(parse_wkt) {
                    geometry_type = GeometryType::of(&g);
                }
            }
        }

        let (fields, columns): (Vec<Field>, Vec<usize>) = names
            .iter()
            .enumerate()
            .filter(|(i, _)| !matches!(geometry, GeometryColumns::Wkt(w) if w == *i))
            .map(|(i, name)| (Field::new(name, inferred[i].field_type()), i))
            .unzip();

        Ok(DelimitedTextSource {
            layout: Arc::new(Layout {
                path,
                delimiter,
                fields: Fields::new(fields),
                columns,
                geometry,
            }),
            geometry_type,
            srid,
            count,
        })
    }
}

impl Layout {
    fn feature(&self, fid: i64, record: &StringRecord) -> SourceFeature {
        let cell = |i: usize| record.get(i).map(str::trim).filter(|c| !c.is_empty());
        let attributes = self
            .fields
            .iter()
            .zip(&self.columns)
            .map(|(field, &col)| {
                let text = cell(col)?;
                match field.field_type() {
                    FieldType::Integer => text.parse().ok().map(FieldValue::IntegerValue),
                    FieldType::Integer64 => text.parse().ok().map(FieldValue::Integer64Value),
                    FieldType::Real => text.parse().ok().map(FieldValue::RealValue),
                    _ => Some(FieldValue::StringValue(text.to_string())),
                }
            })
            .collect();
        let geometry = match self.geometry {
            GeometryColumns::None => None,
            GeometryColumns::Wkt(w) => cell(w).and_then(|wkt| {
                parse_wkt(wkt).unwrap_or_else(|e| {
                    log::warn!("{}: row {fid}: {e}", self.path.display());
                    None
                })
            }),
            GeometryColumns::Xy(x, y) => {
                match (
                    cell(x).and_then(|v| v.parse::<f64>().ok()),
                    cell(y).and_then(|v| v.parse::<f64>().ok()),
                ) {
                    (Some(x), Some(y)) => Some(Geometry::Point(Point::new(x, y))),
                    _ => None,
                }
            }
        };
        SourceFeature {
            fid,
            attributes,
            geometry,
        }
    }
}

struct DelimitedTextStream {
    layout: Arc<Layout>,
    records: StringRecordsIntoIter<File>,
    request: FeatureRequest,
    fid: i64,
}

impl Iterator for DelimitedTextStream {
    type Item = SourceFeature;

    fn next(&mut self) -> Option<SourceFeature> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("{}: {e}", self.layout.path.display());
                    return None;
                }
            };
            if is_blank(&record) {
                continue;
            }
            self.fid += 1;
            let feature = self.layout.feature(self.fid, &record);
            if let Some(feature) = apply_request(&feature, &self.request) {
                return Some(feature);
            }
        }
    }
}

impl VectorSource for DelimitedTextSource {
    fn fields(&self) -> Fields {
        self.layout.fields.clone()
    }

    fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    fn srid(&self) -> i32 {
        self.srid
    }

    fn feature_count(&self) -> Option<u64> {
        Some(self.count)
    }

    fn get_features(&self, request: &FeatureRequest) -> Result<FeatureStream> {
        let records = reader(&self.layout.path, self.layout.delimiter)?.into_records();
        Ok(Box::new(DelimitedTextStream {
            layout: self.layout.clone(),
            records,
            request: request.clone(),
            fid: 0,
        }))
    }
}

/// Provider `delimitedtext`.
pub struct DelimitedTextProvider;

impl Provider for DelimitedTextProvider {
    fn name(&self) -> &str {
        "delimitedtext"
    }

    fn open(&self, connection: &str) -> Result<Arc<dyn VectorSource>> {
        Ok(Arc::new(DelimitedTextSource::from_uri(connection)?))
    }
}
