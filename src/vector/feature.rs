use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use geo_types::Geometry;
use rusqlite::types::{Value, ValueRef};
use rusqlite::Row;

use crate::errors::{Result, VirtualLayerError};
use crate::sql::schema::ResultSchema;
use crate::vector::ops::conversions::{decode_blob, parse_wkt};
use crate::vector::{FeatureFilter, FeatureRequest, FieldType, Fields, RequestFlags};

/// One row of a virtual layer.
///
/// Features are built fresh for every row consumed from a
/// [`FeatureIterator`](crate::vector::FeatureIterator) and never change afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature<'a> {
    fields: &'a Fields,
    fid: i64,
    attributes: Vec<Option<FieldValue>>,
    geometry: Option<Geometry<f64>>,
}

impl<'a> Feature<'a> {
    pub fn fid(&self) -> i64 {
        self.fid
    }

    /// Returns the index of the field called `name`.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .index_of(name)
            .ok_or_else(|| VirtualLayerError::InvalidFieldName {
                field_name: name.to_string(),
            })
    }

    /// Get the value of the field at `idx`.
    ///
    /// Returns `Ok(None)` for a null value and for attributes left out of
    /// the request with [`FeatureRequest::with_subset_of_attributes`].
    pub fn field(&self, idx: usize) -> Result<Option<FieldValue>> {
        self.attributes
            .get(idx)
            .cloned()
            .ok_or(VirtualLayerError::InvalidFieldIndex { index: idx })
    }

    /// Get the value of the field called `name`.
    pub fn field_by_name(&self, name: &str) -> Result<Option<FieldValue>> {
        self.field(self.field_index(name)?)
    }

    pub fn field_as_integer64(&self, idx: usize) -> Result<Option<i64>> {
        Ok(self.field(idx)?.and_then(FieldValue::into_int64))
    }

    pub fn field_as_double(&self, idx: usize) -> Result<Option<f64>> {
        Ok(self.field(idx)?.and_then(FieldValue::into_real))
    }

    pub fn field_as_string(&self, idx: usize) -> Result<Option<String>> {
        Ok(self.field(idx)?.map(|v| v.to_string()))
    }

    /// Iterates over `(name, value)` pairs in field order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.fields
            .iter()
            .zip(self.attributes.iter())
            .map(|(f, v)| (f.name(), v.as_ref()))
    }

    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }
}

/// Value of one attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    IntegerValue(i32),
    Integer64Value(i64),
    RealValue(f64),
    StringValue(String),
    DateValue(NaiveDate),
    DateTimeValue(DateTime<FixedOffset>),
    BinaryValue(Vec<u8>),
}

impl FieldValue {
    /// Interpret the value as `String`. Returns `None` if the value is something else.
    pub fn into_string(self) -> Option<String> {
        match self {
            FieldValue::StringValue(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as `i32`. Returns `None` if the value is something else
    /// or does not fit.
    pub fn into_int(self) -> Option<i32> {
        match self {
            FieldValue::IntegerValue(v) => Some(v),
            FieldValue::Integer64Value(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    /// Interpret the value as `i64`. Returns `None` if the value is something else.
    pub fn into_int64(self) -> Option<i64> {
        match self {
            FieldValue::IntegerValue(v) => Some(v as i64),
            FieldValue::Integer64Value(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret the value as `f64`; integers are widened.
    pub fn into_real(self) -> Option<f64> {
        match self {
            FieldValue::RealValue(v) => Some(v),
            FieldValue::IntegerValue(v) => Some(v as f64),
            FieldValue::Integer64Value(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn into_date(self) -> Option<NaiveDate> {
        match self {
            FieldValue::DateValue(d) => Some(d),
            FieldValue::DateTimeValue(dt) => Some(dt.date_naive()),
            _ => None,
        }
    }

    pub fn into_datetime(self) -> Option<DateTime<FixedOffset>> {
        match self {
            FieldValue::DateTimeValue(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            FieldValue::BinaryValue(b) => Some(b),
            _ => None,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::IntegerValue(_) => FieldType::Integer,
            FieldValue::Integer64Value(_) => FieldType::Integer64,
            FieldValue::RealValue(_) => FieldType::Real,
            FieldValue::StringValue(_) => FieldType::String,
            FieldValue::DateValue(_) => FieldType::Date,
            FieldValue::DateTimeValue(_) => FieldType::DateTime,
            FieldValue::BinaryValue(_) => FieldType::Binary,
        }
    }

    /// The value as the SQL engine stores it. Dates travel as ISO 8601 text.
    pub(crate) fn to_sql(&self) -> Value {
        match self {
            FieldValue::IntegerValue(v) => Value::Integer(*v as i64),
            FieldValue::Integer64Value(v) => Value::Integer(*v),
            FieldValue::RealValue(v) => Value::Real(*v),
            FieldValue::StringValue(s) => Value::Text(s.clone()),
            FieldValue::DateValue(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
            FieldValue::DateTimeValue(dt) => Value::Text(dt.to_rfc3339()),
            FieldValue::BinaryValue(b) => Value::Blob(b.clone()),
        }
    }

    /// Converts an engine value to `field_type`. Values that cannot be
    /// represented in that type become `None`.
    pub(crate) fn from_sql(value: ValueRef<'_>, field_type: FieldType) -> Option<FieldValue> {
        let text = |v: ValueRef<'_>| match v {
            ValueRef::Text(t) => std::str::from_utf8(t).ok().map(str::trim).map(str::to_string),
            _ => None,
        };
        match (field_type, value) {
            (_, ValueRef::Null) => None,
            (FieldType::Integer, ValueRef::Integer(i)) => Some(match i32::try_from(i) {
                Ok(v) => FieldValue::IntegerValue(v),
                Err(_) => FieldValue::Integer64Value(i),
            }),
            (FieldType::Integer, ValueRef::Real(r)) => Some(FieldValue::IntegerValue(r as i32)),
            (FieldType::Integer, v) => text(v)?.parse().ok().map(FieldValue::IntegerValue),
            (FieldType::Integer64, ValueRef::Integer(i)) => Some(FieldValue::Integer64Value(i)),
            (FieldType::Integer64, ValueRef::Real(r)) => Some(FieldValue::Integer64Value(r as i64)),
            (FieldType::Integer64, v) => text(v)?.parse().ok().map(FieldValue::Integer64Value),
            (FieldType::Real, ValueRef::Integer(i)) => Some(FieldValue::RealValue(i as f64)),
            (FieldType::Real, ValueRef::Real(r)) => Some(FieldValue::RealValue(r)),
            (FieldType::Real, v) => text(v)?.parse().ok().map(FieldValue::RealValue),
            (FieldType::String, ValueRef::Integer(i)) => Some(FieldValue::StringValue(i.to_string())),
            (FieldType::String, ValueRef::Real(r)) => Some(FieldValue::StringValue(r.to_string())),
            (FieldType::String, ValueRef::Text(t)) => Some(FieldValue::StringValue(
                String::from_utf8_lossy(t).into_owned(),
            )),
            (FieldType::String, ValueRef::Blob(b)) => Some(FieldValue::StringValue(
                String::from_utf8_lossy(b).into_owned(),
            )),
            (FieldType::Date, v) => parse_date(&text(v)?).map(FieldValue::DateValue),
            (FieldType::DateTime, v) => parse_datetime(&text(v)?).map(FieldValue::DateTimeValue),
            (FieldType::Binary, ValueRef::Blob(b)) => Some(FieldValue::BinaryValue(b.to_vec())),
            (FieldType::Binary, ValueRef::Text(t)) => Some(FieldValue::BinaryValue(t.to_vec())),
            (FieldType::Binary, _) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::IntegerValue(v) => write!(f, "{v}"),
            FieldValue::Integer64Value(v) => write!(f, "{v}"),
            FieldValue::RealValue(v) => write!(f, "{v}"),
            FieldValue::StringValue(s) => f.write_str(s),
            FieldValue::DateValue(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::DateTimeValue(dt) => f.write_str(&dt.to_rfc3339()),
            FieldValue::BinaryValue(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
}

/// RFC 3339 first, then naive `YYYY-MM-DD[ T]HH:MM:SS` read as UTC.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Turns result rows into [`Feature`]s for one scan.
pub(crate) struct FeatureMapper<'a> {
    schema: &'a ResultSchema,
    decoded: Vec<bool>,
    decode_geometry: bool,
    /// Id filter left for the mapper when the layer has no uid column.
    post_filter: Option<Vec<i64>>,
    counter: i64,
}

impl<'a> FeatureMapper<'a> {
    pub(crate) fn new(schema: &'a ResultSchema, request: &FeatureRequest) -> Self {
        let decoded = match request.subset_of_attributes() {
            Some(subset) => {
                let mut decoded = vec![false; schema.fields.len()];
                for &i in subset {
                    if let Some(d) = decoded.get_mut(i) {
                        *d = true;
                    }
                }
                decoded
            }
            None => vec![true; schema.fields.len()],
        };
        let post_filter = match (&schema.uid, request.filter()) {
            (None, FeatureFilter::Fid(fid)) => Some(vec![*fid]),
            (None, FeatureFilter::Fids(fids)) => Some(fids.clone()),
            _ => None,
        };
        FeatureMapper {
            schema,
            decoded,
            decode_geometry: schema.geometry.is_some()
                && !request.flags().contains(RequestFlags::NO_GEOMETRY),
            post_filter,
            counter: 0,
        }
    }

    /// Maps one row; `Ok(None)` means the row is filtered out.
    pub(crate) fn map_row(&mut self, row: &Row<'_>) -> Result<Option<Feature<'a>>> {
        self.counter += 1;
        let fid = match &self.schema.uid {
            Some(uid) => value_to_id(row.get_ref(uid.index)?),
            None => self.counter,
        };
        if let Some(wanted) = &self.post_filter {
            if !wanted.contains(&fid) {
                return Ok(None);
            }
        }

        let mut attributes = Vec::with_capacity(self.schema.fields.len());
        for (i, field) in self.schema.fields.iter().enumerate() {
            if !self.decoded[i] {
                attributes.push(None);
                continue;
            }
            let value = row.get_ref(self.schema.attribute_columns[i])?;
            attributes.push(FieldValue::from_sql(value, field.field_type()));
        }

        let geometry = match (&self.schema.geometry, self.decode_geometry) {
            (Some(column), true) => decode_geometry(row.get_ref(column.index)?),
            _ => None,
        };

        Ok(Some(Feature {
            fields: &self.schema.fields,
            fid,
            attributes,
            geometry,
        }))
    }
}

fn value_to_id(value: ValueRef<'_>) -> i64 {
    match value {
        ValueRef::Integer(i) => i,
        ValueRef::Real(r) => r as i64,
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

fn decode_geometry(value: ValueRef<'_>) -> Option<Geometry<f64>> {
    let decoded = match value {
        ValueRef::Blob(blob) => decode_blob(blob),
        ValueRef::Text(wkt) => parse_wkt(&String::from_utf8_lossy(wkt)),
        _ => return None,
    };
    decoded.unwrap_or_else(|e| {
        log::warn!("Dropping undecodable geometry: {e}");
        None
    })
}
