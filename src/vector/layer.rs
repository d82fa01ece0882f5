use std::cell::RefCell;
use std::iter::FusedIterator;

use geo_types::Rect;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Rows, Statement};

use crate::definition::VirtualLayerDefinition;
use crate::errors::{Result, VirtualLayerError};
use crate::options::OpenOptions;
use crate::source::SourceRegistry;
use crate::sql::pushdown::{build_row_query, statistics_query};
use crate::sql::schema::ResultSchema;
use crate::sql::QueryExecutor;
use crate::store;
use crate::vector::feature::FeatureMapper;
use crate::vector::{Capabilities, Feature, FeatureRequest, Fields, GeometryType};

#[derive(Clone, Copy, Debug)]
struct Statistics {
    feature_count: u64,
    extent: Option<Rect<f64>>,
}

/// A SQL view over one or more vector sources, read as features.
///
/// ```
/// use std::sync::Arc;
/// use vlayer::source::{MemorySource, SourceRegistry};
/// use vlayer::vector::{FeatureRequest, FieldType, FieldValue, GeometryType};
/// use vlayer::VirtualLayer;
///
/// let towns = MemorySource::new(
///     GeometryType::Point,
///     4326,
///     &[("id", FieldType::Integer), ("name", FieldType::String)],
/// );
/// for (id, name) in [(7, "Arles"), (9, "Nîmes")] {
///     towns
///         .add_feature(
///             vec![
///                 Some(FieldValue::IntegerValue(id)),
///                 Some(FieldValue::StringValue(name.to_string())),
///             ],
///             Some(geo_types::point!(x: 4.6, y: 43.7).into()),
///         )
///         .unwrap();
/// }
/// let sources = SourceRegistry::new();
/// sources.add("towns-1", "towns", Arc::new(towns));
///
/// let layer = VirtualLayer::open(
///     "?reference=towns-1:towns&query=SELECT%20*%20FROM%20towns&uid=id",
///     &sources,
/// )
/// .unwrap();
/// let mut result_set = layer.get_features(&FeatureRequest::new());
/// let ids: Vec<i64> = result_set.features().map(|f| f.unwrap().fid()).collect();
/// assert_eq!(ids, [7, 9]);
/// ```
pub struct VirtualLayer {
    definition: VirtualLayerDefinition,
    executor: QueryExecutor,
    schema: ResultSchema,
    subset: Option<String>,
    statistics: RefCell<Option<Statistics>>,
    last_error: RefCell<Option<VirtualLayerError>>,
}

impl VirtualLayer {
    /// Opens the layer described by `uri`, resolving references in `sources`.
    pub fn open(uri: &str, sources: &SourceRegistry) -> Result<Self> {
        Self::open_ex(
            uri,
            OpenOptions {
                sources: sources.clone(),
                ..Default::default()
            },
        )
    }

    pub fn open_ex(uri: &str, options: OpenOptions) -> Result<Self> {
        Self::from_definition(VirtualLayerDefinition::from_uri(uri)?, options)
    }

    /// Opens a layer from an already built definition.
    ///
    /// Any failure leaves nothing open: sources, schema and, when the
    /// definition names a backing store, the stored configuration are all
    /// settled before the layer is returned.
    pub fn from_definition(definition: VirtualLayerDefinition, options: OpenOptions) -> Result<Self> {
        let (definition, backing_store) = store::resolve_definition(definition)?;
        let (executor, schema) = QueryExecutor::open(&definition, &options, backing_store)?;
        Ok(VirtualLayer {
            definition,
            executor,
            schema,
            subset: None,
            statistics: RefCell::new(None),
            last_error: RefCell::new(None),
        })
    }

    /// The definition the layer runs, the stored one when reopened from a
    /// backing store.
    pub fn definition(&self) -> &VirtualLayerDefinition {
        &self.definition
    }

    pub fn fields(&self) -> &Fields {
        &self.schema.fields
    }

    pub fn field_count(&self) -> usize {
        self.schema.fields.len()
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.schema.geometry_type()
    }

    pub fn srid(&self) -> i32 {
        self.schema.srid()
    }

    pub fn geometry_column(&self) -> Option<&str> {
        self.schema.geometry.as_ref().map(|g| g.name.as_str())
    }

    pub fn uid_column(&self) -> Option<&str> {
        self.schema.uid.as_ref().map(|u| u.name.as_str())
    }

    pub fn capabilities(&self) -> Capabilities {
        if self.schema.uid.is_some() {
            Capabilities::SELECT_AT_ID | Capabilities::SELECT_GEOMETRY_AT_ID
        } else {
            Capabilities::empty()
        }
    }

    pub fn subset_string(&self) -> Option<&str> {
        self.subset.as_deref()
    }

    /// Sets an SQL condition on the output columns that every request
    /// applies. It is only checked when features are read.
    pub fn set_subset_string(&mut self, subset: Option<&str>) {
        self.subset = subset.map(str::to_string);
        self.statistics.replace(None);
    }

    /// Number of features. A layer passing a single source through
    /// unfiltered takes the count the source reports; otherwise the query is
    /// run.
    pub fn feature_count(&self) -> Result<u64> {
        if let Some(count) = self.source_feature_count() {
            return Ok(count);
        }
        Ok(self.statistics()?.feature_count)
    }

    fn source_feature_count(&self) -> Option<u64> {
        if self.subset.is_some()
            || self.definition.query().is_some()
            || self.definition.spatial_filter().is_some()
        {
            return None;
        }
        match self.definition.sources() {
            [source] => self.executor.source_feature_count(source),
            _ => None,
        }
    }

    /// Bounding box of all geometries; `None` without geometries.
    pub fn extent(&self) -> Result<Option<Rect<f64>>> {
        Ok(self.statistics()?.extent)
    }

    fn statistics(&self) -> Result<Statistics> {
        if let Some(statistics) = *self.statistics.borrow() {
            return Ok(statistics);
        }
        let sql = statistics_query(
            &self.schema,
            self.executor.effective_query(),
            self.subset.as_deref(),
        );
        let with_extent = self.schema.geometry.is_some();
        let statistics = self
            .executor
            .prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_row([], |row| {
                    let count: i64 = row.get(0)?;
                    let extent = if with_extent {
                        let bounds: [Option<f64>; 4] =
                            [row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?];
                        match bounds {
                            [Some(x1), Some(y1), Some(x2), Some(y2)] => {
                                Some(Rect::new((x1, y1), (x2, y2)))
                            }
                            _ => None,
                        }
                    } else {
                        None
                    };
                    Ok(Statistics {
                        feature_count: count.max(0) as u64,
                        extent,
                    })
                })
            })
            .map_err(|e| self.record(VirtualLayerError::from_fetch_error(e)))?;
        self.statistics.replace(Some(statistics));
        Ok(statistics)
    }

    /// Runs `request`; rows are only fetched once the result set is iterated.
    pub fn get_features(&self, request: &FeatureRequest) -> ResultSet<'_> {
        let query = build_row_query(
            &self.definition,
            &self.schema,
            self.executor.effective_query(),
            self.subset.as_deref(),
            request,
        );
        let (statement, pending) = match self.executor.prepare(&query.sql) {
            Ok(statement) => (Some(statement), None),
            Err(e) => (None, Some(VirtualLayerError::from_fetch_error(e))),
        };
        ResultSet {
            layer: self,
            request: request.clone(),
            statement,
            params: query.params,
            pending,
        }
    }

    /// The most recent error met while reading features.
    pub fn error(&self) -> Option<VirtualLayerError> {
        self.last_error.borrow().clone()
    }

    fn record(&self, err: VirtualLayerError) -> VirtualLayerError {
        self.last_error.replace(Some(err.clone()));
        err
    }
}

/// The features matching one [`FeatureRequest`].
pub struct ResultSet<'a> {
    layer: &'a VirtualLayer,
    request: FeatureRequest,
    statement: Option<Statement<'a>>,
    params: Vec<Value>,
    pending: Option<VirtualLayerError>,
}

impl ResultSet<'_> {
    /// Iterates over the features, running the query again on every call.
    ///
    /// An error ends the iteration after being yielded.
    pub fn features(&mut self) -> FeatureIterator<'_> {
        let mut pending = self.pending.clone();
        let rows = match &mut self.statement {
            Some(statement) => match statement.query(params_from_iter(self.params.iter())) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    pending = Some(VirtualLayerError::from_fetch_error(e));
                    None
                }
            },
            None => None,
        };
        FeatureIterator {
            layer: self.layer,
            rows,
            mapper: FeatureMapper::new(&self.layer.schema, &self.request),
            pending,
        }
    }
}

pub struct FeatureIterator<'a> {
    layer: &'a VirtualLayer,
    rows: Option<Rows<'a>>,
    mapper: FeatureMapper<'a>,
    pending: Option<VirtualLayerError>,
}

impl<'a> FeatureIterator<'a> {
    fn fail(&mut self, err: VirtualLayerError) -> Option<Result<Feature<'a>>> {
        self.rows = None;
        Some(Err(self.layer.record(err)))
    }
}

impl<'a> Iterator for FeatureIterator<'a> {
    type Item = Result<Feature<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return self.fail(err);
        }
        let step = loop {
            let rows = self.rows.as_mut()?;
            match rows.next() {
                Ok(Some(row)) => match self.mapper.map_row(row) {
                    Ok(Some(feature)) => break Ok(Some(feature)),
                    Ok(None) => {}
                    Err(err) => break Err(err),
                },
                Ok(None) => break Ok(None),
                Err(err) => break Err(VirtualLayerError::from_fetch_error(err)),
            }
        };
        match step {
            Ok(Some(feature)) => Some(Ok(feature)),
            Ok(None) => {
                self.rows = None;
                None
            }
            Err(err) => self.fail(err),
        }
    }
}

impl FusedIterator for FeatureIterator<'_> {}
