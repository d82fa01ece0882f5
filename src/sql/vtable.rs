//! The `VirtualLayer` SQLite module: every registered source becomes a
//! virtual table backed by a [`Relation`].

use std::collections::HashMap;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::ffi;
use rusqlite::types::Value;
use rusqlite::vtab::{
    read_only_module, Context, CreateVTab, IndexConstraintOp, IndexInfo, VTab, VTabConnection,
    VTabCursor, VTabKind, Values,
};
use rusqlite::Connection;

use super::relation::{Relation, RelationCursor};
use crate::errors::{Result, VirtualLayerError};
use crate::options::OpenOptions;
use crate::source::{ProviderRegistry, SourceRegistry, VectorSource};
use crate::utils::dequote;
use crate::vector::ops::conversions::read_header;
use crate::vector::FeatureRequest;

pub(crate) const MODULE_NAME: &str = "VirtualLayer";

const FULL_SCAN: c_int = 0;
const FID_FILTER: c_int = 1;
const FRAME_FILTER: c_int = 2;

/// Shared state of the module: where references and embedded sources
/// are resolved.
pub(crate) struct ModuleContext {
    sources: SourceRegistry,
    providers: ProviderRegistry,
    embedded: Mutex<HashMap<(String, String), Arc<dyn VectorSource>>>,
}

impl ModuleContext {
    pub(crate) fn new(options: &OpenOptions) -> Self {
        ModuleContext {
            sources: options.sources.clone(),
            providers: options.providers.clone(),
            embedded: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Opens an embedded source once; later calls share it.
    pub(crate) fn embedded(&self, provider: &str, connection: &str) -> Result<Arc<dyn VectorSource>> {
        let mut embedded = self.embedded.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (provider.to_string(), connection.to_string());
        if let Some(source) = embedded.get(&key) {
            return Ok(source.clone());
        }
        log::debug!("Opening {provider} source '{connection}'");
        let source = self.providers.open(provider, connection)?;
        embedded.insert(key, source.clone());
        Ok(source)
    }
}

pub(crate) fn register_module(conn: &Connection, ctx: Arc<ModuleContext>) -> Result<()> {
    conn.create_module(MODULE_NAME, read_only_module::<VirtualLayerTab>(), Some(ctx))?;
    Ok(())
}

#[repr(C)]
pub(crate) struct VirtualLayerTab {
    base: ffi::sqlite3_vtab,
    relation: Relation,
}

unsafe impl<'vtab> VTab<'vtab> for VirtualLayerTab {
    type Aux = Arc<ModuleContext>;
    type Cursor = VirtualLayerCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&Arc<ModuleContext>>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let ctx = aux.ok_or_else(|| {
            rusqlite::Error::ModuleError(format!("{MODULE_NAME} module has no context"))
        })?;
        let module_args: Vec<String> = args
            .iter()
            .skip(3)
            .map(|arg| dequote(String::from_utf8_lossy(arg).trim()))
            .collect();
        let relation = Relation::connect(ctx, &module_args).map_err(VirtualLayerError::into_sqlite)?;
        let vtab = VirtualLayerTab {
            base: ffi::sqlite3_vtab::default(),
            relation,
        };
        Ok((vtab.relation.declaration(), vtab))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let mut frame = None;
        let mut fid = None;
        for (i, constraint) in info.constraints().enumerate() {
            if !constraint.is_usable()
                || !matches!(
                    constraint.operator(),
                    IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ
                )
            {
                continue;
            }
            let column = usize::try_from(constraint.column()).ok();
            if column == Some(0) {
                frame = Some(i);
            } else if column.is_some() && column == self.relation.primary_key_column() {
                fid = Some(i);
            }
        }

        if let Some(i) = fid {
            let mut usage = info.constraint_usage(i);
            usage.set_argv_index(1);
            usage.set_omit(false);
            info.set_idx_num(FID_FILTER);
            info.set_estimated_cost(1.0);
        } else if let Some(i) = frame {
            let mut usage = info.constraint_usage(i);
            usage.set_argv_index(1);
            usage.set_omit(true);
            info.set_idx_num(FRAME_FILTER);
            info.set_estimated_cost(100.0);
        } else {
            info.set_idx_num(FULL_SCAN);
            info.set_estimated_cost(1_000_000.0);
        }
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<VirtualLayerCursor<'vtab>> {
        Ok(VirtualLayerCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            relation: &self.relation,
            cursor: None,
        })
    }
}

impl CreateVTab<'_> for VirtualLayerTab {
    const KIND: VTabKind = VTabKind::Default;
}

#[repr(C)]
pub(crate) struct VirtualLayerCursor<'vtab> {
    base: ffi::sqlite3_vtab_cursor,
    relation: &'vtab Relation,
    cursor: Option<RelationCursor>,
}

impl VirtualLayerCursor<'_> {
    /// Translates the constraint chosen in `best_index` into a source
    /// request; `None` when no row can match.
    fn request(idx_num: c_int, args: &Values<'_>) -> rusqlite::Result<Option<FeatureRequest>> {
        let request = match idx_num {
            FRAME_FILTER => match args.get::<Value>(0)? {
                Value::Blob(blob) => match read_header(&blob) {
                    Ok(header) => Some(FeatureRequest::new().with_filter_rect(header.mbr)),
                    Err(_) => None,
                },
                _ => None,
            },
            FID_FILTER => match args.get::<Value>(0)? {
                Value::Integer(fid) => Some(FeatureRequest::new().with_fid(fid)),
                _ => None,
            },
            _ => Some(FeatureRequest::new()),
        };
        Ok(request)
    }
}

unsafe impl VTabCursor for VirtualLayerCursor<'_> {
    fn filter(
        &mut self,
        idx_num: c_int,
        _idx_str: Option<&str>,
        args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        let request = Self::request(idx_num, args)?;
        log::trace!("Relation scan with {request:?}");
        self.cursor = match request {
            Some(request) => self
                .relation
                .open_cursor(&request)
                .map_err(VirtualLayerError::into_sqlite)?,
            None => None,
        };
        if let Some(cursor) = &mut self.cursor {
            cursor.advance();
        }
        Ok(())
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        if let Some(cursor) = &mut self.cursor {
            cursor.advance();
        }
        Ok(())
    }

    fn eof(&self) -> bool {
        self.cursor.as_ref().map_or(true, |c| !c.has_row())
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        let value = match (&self.cursor, usize::try_from(i)) {
            (Some(cursor), Ok(i)) => cursor.column(i),
            _ => Value::Null,
        };
        ctx.set_result(&value)
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.cursor.as_ref().map_or(0, |c| c.row_identity()))
    }
}
