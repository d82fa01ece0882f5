//! Embedded SQL execution of virtual layers.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{Connection, Statement};

use crate::definition::{SourceKind, SourceLayer, VirtualLayerDefinition};
use crate::errors::{Result, VirtualLayerError};
use crate::options::OpenOptions;
use crate::store::{self, BackingStore};
use crate::utils::{quote_identifier, quote_literal};

pub(crate) mod functions;
pub(crate) mod pushdown;
pub(crate) mod relation;
pub(crate) mod schema;
pub(crate) mod vtable;

use schema::ResultSchema;
use vtable::{ModuleContext, MODULE_NAME};

/// One SQL context per open virtual layer.
pub(crate) struct QueryExecutor {
    conn: Connection,
    ctx: Arc<ModuleContext>,
    effective_query: String,
}

/// The query run when the definition carries none.
fn effective_query(definition: &VirtualLayerDefinition) -> Result<String> {
    match (definition.query(), definition.sources()) {
        (Some(query), _) => Ok(query
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
            .to_string()),
        (None, [source]) => Ok(format!("SELECT * FROM {}", quote_identifier(&source.alias))),
        (None, sources) => Err(VirtualLayerError::ConfigurationError(format!(
            "A query is required with {} sources",
            sources.len()
        ))),
    }
}

fn check_aliases(definition: &VirtualLayerDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for source in definition.sources() {
        if !seen.insert(source.alias.to_lowercase()) {
            return Err(VirtualLayerError::ConfigurationError(format!(
                "Duplicate source name '{}'",
                source.alias
            )));
        }
    }
    Ok(())
}

fn create_relations(conn: &Connection, definition: &VirtualLayerDefinition) -> Result<()> {
    for source in definition.sources() {
        let args = match &source.kind {
            SourceKind::Reference { id } => quote_literal(id),
            SourceKind::Embedded {
                provider,
                connection,
            } => format!("{}, {}", quote_literal(provider), quote_literal(connection)),
        };
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE {} USING {MODULE_NAME}({args})",
            quote_identifier(&source.alias)
        ))?;
    }
    Ok(())
}

impl QueryExecutor {
    /// Sets up the context of `definition` and infers its result schema.
    ///
    /// Sources are resolved first so that a missing reference or a provider
    /// failure is reported as such. A fresh backing store receives the
    /// relations and the configuration in one transaction, which is only
    /// committed once the schema is known.
    pub(crate) fn open(
        definition: &VirtualLayerDefinition,
        options: &OpenOptions,
        store: Option<BackingStore>,
    ) -> Result<(QueryExecutor, ResultSchema)> {
        check_aliases(definition)?;
        let effective_query = effective_query(definition)?;

        let ctx = Arc::new(ModuleContext::new(options));
        for source in definition.sources() {
            match &source.kind {
                SourceKind::Reference { id } => {
                    if options.sources.get(id).is_none() {
                        return Err(VirtualLayerError::UnknownSource {
                            reference: id.clone(),
                        });
                    }
                }
                SourceKind::Embedded {
                    provider,
                    connection,
                } => {
                    ctx.embedded(provider, connection)?;
                }
            }
        }

        let (conn, setup) = match store {
            Some(BackingStore { conn, fresh }) => (conn, fresh),
            None => (Connection::open_in_memory()?, true),
        };
        vtable::register_module(&conn, ctx.clone())?;
        functions::register_spatial_functions(&conn)?;

        let schema = if setup {
            let tx = conn.unchecked_transaction()?;
            create_relations(&tx, definition)?;
            let schema = schema::infer_schema(&tx, &effective_query, definition, options.scan_limit)?;
            if definition.path().is_some() {
                store::write_definition(&tx, definition)?;
            }
            tx.commit()?;
            schema
        } else {
            schema::infer_schema(&conn, &effective_query, definition, options.scan_limit)?
        };
        conn.pragma_update(None, "query_only", true)?;

        log::debug!(
            "Opened virtual layer over {} source(s): {effective_query}",
            definition.sources().len()
        );
        Ok((
            QueryExecutor {
                conn,
                ctx,
                effective_query,
            },
            schema,
        ))
    }

    pub(crate) fn effective_query(&self) -> &str {
        &self.effective_query
    }

    /// The count `source` reports without a scan. `None` once a referenced
    /// source is gone.
    pub(crate) fn source_feature_count(&self, source: &SourceLayer) -> Option<u64> {
        let source = match &source.kind {
            SourceKind::Reference { id } => self.ctx.sources().get(id)?,
            SourceKind::Embedded {
                provider,
                connection,
            } => self.ctx.embedded(provider, connection).ok()?,
        };
        source.feature_count()
    }

    /// Prepares a statement issued on behalf of a feature request.
    pub(crate) fn prepare(&self, sql: &str) -> rusqlite::Result<Statement<'_>> {
        self.conn.prepare(sql)
    }
}
