use std::sync::Arc;

use rusqlite::types::Value;

use super::vtable::ModuleContext;
use crate::errors::{Result, VirtualLayerError};
use crate::source::{FeatureStream, SourceFeature, SourceHandle, VectorSource};
use crate::utils::quote_identifier;
use crate::vector::ops::conversions::encode_blob;
use crate::vector::{FeatureRequest, Fields, GeometryType};

/// Hidden column carrying the search rectangle of a relation scan.
pub(crate) const SEARCH_FRAME: &str = "_search_frame_";

enum Backend {
    /// Revocable: resolved again on every scan.
    Reference(SourceHandle),
    Embedded(Arc<dyn VectorSource>),
}

/// One source exposed as a SQL relation.
///
/// Column 0 is the hidden search frame, followed by the source attributes
/// and, when the source has one, the geometry column.
pub(crate) struct Relation {
    backend: Backend,
    fields: Fields,
    geometry_type: GeometryType,
    srid: i32,
    primary_key: Option<usize>,
}

impl Relation {
    /// Builds the relation from its module arguments: a single source id for
    /// a reference, or a provider name and a connection string.
    pub(crate) fn connect(ctx: &ModuleContext, args: &[String]) -> Result<Relation> {
        let (backend, source) = match args {
            [id] => {
                let handle = ctx.sources().handle(id);
                let source = handle
                    .resolve()
                    .ok_or_else(|| VirtualLayerError::UnknownSource {
                        reference: id.clone(),
                    })?;
                (Backend::Reference(handle), source)
            }
            [provider, connection] => {
                let source = ctx.embedded(provider, connection)?;
                (Backend::Embedded(source.clone()), source)
            }
            _ => {
                return Err(VirtualLayerError::ConfigurationError(format!(
                    "Expected 1 or 2 relation arguments, got {}",
                    args.len()
                )))
            }
        };
        Ok(Relation {
            backend,
            fields: source.fields(),
            geometry_type: source.geometry_type(),
            srid: source.srid(),
            primary_key: source.primary_key_index(),
        })
    }

    fn has_geometry(&self) -> bool {
        self.geometry_type.has_geometry()
    }

    /// Name of the geometry column, avoiding attribute names.
    fn geometry_column(&self) -> &'static str {
        if self.fields.index_of("geometry").is_some() {
            "_geometry"
        } else {
            "geometry"
        }
    }

    /// The `CREATE TABLE` statement declaring the relation columns.
    pub(crate) fn declaration(&self) -> String {
        let mut columns = vec![format!("{} HIDDEN BLOB", quote_identifier(SEARCH_FRAME))];
        for field in &self.fields {
            columns.push(format!(
                "{} {}",
                quote_identifier(field.name()),
                field.field_type().decl_type()
            ));
        }
        if self.has_geometry() {
            columns.push(format!(
                "{} {}",
                quote_identifier(self.geometry_column()),
                self.geometry_type.decl_type(self.srid)
            ));
        }
        format!("CREATE TABLE x({})", columns.join(", "))
    }

    /// Relation column holding the source primary key.
    pub(crate) fn primary_key_column(&self) -> Option<usize> {
        self.primary_key.map(|pk| pk + 1)
    }

    /// Starts a scan; `None` when a referenced source is gone.
    pub(crate) fn open_cursor(&self, request: &FeatureRequest) -> Result<Option<RelationCursor>> {
        let source = match &self.backend {
            Backend::Reference(handle) => match handle.resolve() {
                Some(source) => source,
                None => {
                    log::warn!("Source '{}' is no longer available", handle.id());
                    return Ok(None);
                }
            },
            Backend::Embedded(source) => source.clone(),
        };
        Ok(Some(RelationCursor {
            stream: source.get_features(request)?,
            current: None,
            attribute_count: self.fields.len(),
            srid: self.srid,
        }))
    }
}

/// Forward-only, single-pass scan over one relation.
pub(crate) struct RelationCursor {
    stream: FeatureStream,
    current: Option<SourceFeature>,
    attribute_count: usize,
    srid: i32,
}

impl RelationCursor {
    /// Moves to the next row; `false` at the end.
    pub(crate) fn advance(&mut self) -> bool {
        self.current = self.stream.next();
        self.current.is_some()
    }

    pub(crate) fn has_row(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn column(&self, i: usize) -> Value {
        let Some(feature) = &self.current else {
            return Value::Null;
        };
        match i {
            0 => Value::Null,
            i if i <= self.attribute_count => feature
                .attributes
                .get(i - 1)
                .and_then(|v| v.as_ref())
                .map_or(Value::Null, |v| v.to_sql()),
            _ => feature
                .geometry
                .as_ref()
                .map_or(Value::Null, |g| Value::Blob(encode_blob(g, self.srid))),
        }
    }

    /// Native fid of the current row.
    pub(crate) fn row_identity(&self) -> i64 {
        self.current.as_ref().map_or(0, |f| f.fid)
    }
}
