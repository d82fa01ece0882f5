use rusqlite::types::ValueRef;
use rusqlite::Connection;

use super::pushdown::wrap_query;
use crate::definition::{GeometrySpec, VirtualLayerDefinition};
use crate::errors::{Result, VirtualLayerError};
use crate::vector::ops::conversions::read_header;
use crate::vector::{Field, FieldType, Fields, GeometryType};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GeometryColumn {
    pub name: String,
    pub index: usize,
    pub geometry_type: GeometryType,
    pub srid: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct UidColumn {
    pub name: String,
    pub index: usize,
}

/// Layout of the rows returned by the effective query.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ResultSchema {
    /// Attribute fields, uid and geometry columns excluded.
    pub fields: Fields,
    /// Result column of each field.
    pub attribute_columns: Vec<usize>,
    pub geometry: Option<GeometryColumn>,
    pub uid: Option<UidColumn>,
}

impl ResultSchema {
    pub(crate) fn geometry_type(&self) -> GeometryType {
        self.geometry
            .as_ref()
            .map_or(GeometryType::NoGeometry, |g| g.geometry_type)
    }

    pub(crate) fn srid(&self) -> i32 {
        self.geometry.as_ref().map_or(0, |g| g.srid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Observed {
    Scalar(FieldType),
    Geometry(GeometryType, i32),
}

fn observe(value: ValueRef<'_>) -> Option<Observed> {
    let observed = match value {
        ValueRef::Null => return None,
        ValueRef::Integer(_) => Observed::Scalar(FieldType::Integer64),
        ValueRef::Real(_) => Observed::Scalar(FieldType::Real),
        ValueRef::Text(_) => Observed::Scalar(FieldType::String),
        ValueRef::Blob(blob) => match read_header(blob) {
            Ok(header) => Observed::Geometry(header.geometry_type, header.srid),
            Err(_) => Observed::Scalar(FieldType::Binary),
        },
    };
    Some(observed)
}

fn is_identifier(label: &str) -> bool {
    let mut chars = label.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Whether `sql` gives `label` as a quoted alias, `AS "a b"` and the like.
fn is_quoted_alias(sql: &str, label: &str) -> bool {
    let sql = sql.to_lowercase();
    let label = label.to_lowercase();
    [('"', '"'), ('`', '`'), ('[', ']'), ('\'', '\'')]
        .iter()
        .any(|(open, close)| {
            let quoted = format!("{open}{label}{close}");
            sql.match_indices(&quoted).any(|(at, _)| {
                let before = sql[..at].trim_end();
                before.ends_with("as")
                    && !before[..before.len() - 2]
                        .chars()
                        .next_back()
                        .is_some_and(|c| c.is_alphanumeric() || c == '_')
            })
        })
}

/// Whether a result column is an expression the query left without a name.
///
/// Columns read straight from a relation carry a declared type; anything
/// else must be named by a plain identifier or an explicit alias.
fn is_unnamed(label: &str, declared: bool, sql: &str) -> bool {
    if label.is_empty() {
        return true;
    }
    !(declared || is_identifier(label) || is_quoted_alias(sql, label))
}

struct Column {
    name: String,
    declared: bool,
    decl_field: Option<FieldType>,
    decl_geometry: Option<(GeometryType, i32)>,
    first_row: Option<Observed>,
    first_non_null: Option<Observed>,
}

impl Column {
    fn geometry(&self) -> Option<(GeometryType, i32)> {
        let scanned = match self.first_non_null {
            Some(Observed::Geometry(kind, srid)) => Some((kind, srid)),
            _ => None,
        };
        match (self.decl_geometry, scanned) {
            (Some((GeometryType::Unknown, _)), Some(scanned)) => Some(scanned),
            (Some(declared), _) => Some(declared),
            (None, scanned) => scanned,
        }
    }

    fn field_type(&self) -> FieldType {
        match (self.decl_field, self.first_row) {
            (Some(field_type), _) => field_type,
            (None, Some(Observed::Scalar(field_type))) => field_type,
            (None, Some(Observed::Geometry(..))) => FieldType::Binary,
            (None, None) if self.decl_geometry.is_some() => FieldType::Binary,
            (None, None) => FieldType::String,
        }
    }

    fn needs_scan(&self) -> bool {
        self.first_non_null.is_none()
            && match self.decl_geometry {
                Some((kind, _)) => kind == GeometryType::Unknown,
                // blobs may still carry geometries
                None => matches!(self.decl_field, None | Some(FieldType::Binary)),
            }
    }
}

/// Derives the schema of `sql`, the effective query of `definition`.
///
/// One pass over the result scans the value types: the first row types the
/// columns without a declared type and rows are read forward, at most
/// `scan_limit` of them, until every undetermined column shows a non-null
/// value.
pub(crate) fn infer_schema(
    conn: &Connection,
    sql: &str,
    definition: &VirtualLayerDefinition,
    scan_limit: Option<usize>,
) -> Result<ResultSchema> {
    let mut stmt = conn.prepare(sql).map_err(VirtualLayerError::from_query_error)?;
    let mut columns: Vec<Column> = stmt
        .columns()
        .iter()
        .map(|c| {
            let decl = c.decl_type().unwrap_or_default();
            Column {
                name: c.name().to_string(),
                declared: c.decl_type().is_some_and(|d| !d.is_empty()),
                decl_field: FieldType::from_decl_type(decl),
                decl_geometry: GeometryType::from_decl_type(decl),
                first_row: None,
                first_non_null: None,
            }
        })
        .collect();

    if definition.query().is_some() {
        if let Some(i) = columns
            .iter()
            .position(|c| is_unnamed(&c.name, c.declared, sql))
        {
            return Err(VirtualLayerError::AmbiguousColumnName { index: i + 1 });
        }
    }
    // feature requests run the query as a subquery
    conn.prepare(&wrap_query(sql))
        .map_err(VirtualLayerError::from_query_error)?;

    let mut rows = stmt.query([]).map_err(VirtualLayerError::from_query_error)?;
    let mut scanned = 0;
    while scanned == 0 || columns.iter().any(Column::needs_scan) {
        if scan_limit.is_some_and(|limit| scanned >= limit) {
            break;
        }
        let Some(row) = rows.next().map_err(VirtualLayerError::from_query_error)? else {
            break;
        };
        for (i, column) in columns.iter_mut().enumerate() {
            let observed = observe(row.get_ref(i)?);
            if scanned == 0 {
                column.first_row = observed;
            }
            if column.first_non_null.is_none() {
                column.first_non_null = observed;
            }
        }
        scanned += 1;
    }
    log::debug!("Scanned {scanned} row(s) of '{sql}'");

    let find = |name: &str| columns.iter().position(|c| c.name.eq_ignore_ascii_case(name));

    let geometry = match definition.geometry() {
        GeometrySpec::Absent => None,
        GeometrySpec::Explicit { column, kind, srid } => {
            let index = find(column).ok_or_else(|| VirtualLayerError::UnknownGeometryColumn {
                column: column.clone(),
            })?;
            let inferred = columns[index].geometry();
            let geometry_type = kind
                .or(inferred.map(|(k, _)| k))
                .filter(|k| *k != GeometryType::Unknown)
                .ok_or_else(|| VirtualLayerError::UndeterminableGeometryType {
                    column: column.clone(),
                })?;
            Some(GeometryColumn {
                name: columns[index].name.clone(),
                index,
                geometry_type,
                srid: srid.or(inferred.map(|(_, s)| s)).unwrap_or(0),
            })
        }
        GeometrySpec::Inferred => {
            let candidates: Vec<usize> = (0..columns.len())
                .filter(|&i| columns[i].geometry().is_some())
                .collect();
            let selected = match candidates.as_slice() {
                [] => None,
                [only] => Some(*only),
                [first, ..] => Some(
                    candidates
                        .iter()
                        .copied()
                        .find(|&i| columns[i].name.eq_ignore_ascii_case("geometry"))
                        .unwrap_or(*first),
                ),
            };
            match selected {
                None => None,
                Some(index) => {
                    let column = &columns[index];
                    match column.geometry() {
                        Some((kind, srid)) if kind != GeometryType::Unknown => Some(GeometryColumn {
                            name: column.name.clone(),
                            index,
                            geometry_type: kind,
                            srid,
                        }),
                        _ => {
                            return Err(VirtualLayerError::UndeterminableGeometryType {
                                column: column.name.clone(),
                            })
                        }
                    }
                }
            }
        }
    };

    let uid = match definition.uid() {
        Some(name) => {
            let index = find(name).ok_or_else(|| {
                VirtualLayerError::NameResolutionError(format!("no such column: {name}"))
            })?;
            Some(UidColumn {
                name: columns[index].name.clone(),
                index,
            })
        }
        None => None,
    };

    let mut fields = Vec::new();
    let mut attribute_columns = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        if geometry.as_ref().is_some_and(|g| g.index == i) || uid.as_ref().is_some_and(|u| u.index == i) {
            continue;
        }
        let field_type = definition
            .field_overrides()
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
            .map_or_else(|| column.field_type(), |(_, t)| *t);
        fields.push(Field::new(&column.name, field_type));
        attribute_columns.push(i);
    }

    Ok(ResultSchema {
        fields: Fields::new(fields),
        attribute_columns,
        geometry,
        uid,
    })
}
