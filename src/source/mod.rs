//! Vector sources a virtual layer reads from.
//!
//! Sources are either registered up front in a [`SourceRegistry`] and
//! referenced by id, or opened on demand by a [`Provider`] from a
//! connection string.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use geo_types::Geometry;

use crate::errors::{Result, VirtualLayerError};
use crate::vector::{FeatureRequest, FieldValue, Fields, GeometryType};

mod delimited_text;
mod memory;

pub use delimited_text::{DelimitedTextProvider, DelimitedTextSource};
pub use memory::{MemoryProvider, MemorySource};

/// A raw record handed out by a [`VectorSource`].
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFeature {
    pub fid: i64,
    pub attributes: Vec<Option<FieldValue>>,
    pub geometry: Option<Geometry<f64>>,
}

pub type FeatureStream = Box<dyn Iterator<Item = SourceFeature>>;

/// Read access to one vector data set.
///
/// `get_features` must honour the request filter: a rectangle selects the
/// features whose bounding box intersects it, a fid or fid list selects by
/// native id. Attributes outside the requested subset and, with
/// [`RequestFlags::NO_GEOMETRY`](crate::vector::RequestFlags::NO_GEOMETRY),
/// the geometry may be left out.
pub trait VectorSource: Send + Sync {
    fn fields(&self) -> Fields;

    fn geometry_type(&self) -> GeometryType;

    fn srid(&self) -> i32 {
        0
    }

    fn has_geometry_type(&self) -> bool {
        self.geometry_type().has_geometry()
    }

    /// Index of an attribute whose values are the native feature ids.
    fn primary_key_index(&self) -> Option<usize> {
        None
    }

    /// Number of features, when it is known without a scan.
    fn feature_count(&self) -> Option<u64> {
        None
    }

    fn get_features(&self, request: &FeatureRequest) -> Result<FeatureStream>;
}

struct RegisteredSource {
    name: String,
    source: Arc<dyn VectorSource>,
}

type Entries = RwLock<BTreeMap<String, RegisteredSource>>;

/// Lookup service for open sources, keyed by id.
///
/// Clones share the same entries. Virtual layers only keep a weak handle on
/// the registry, so removing a source (or dropping the registry) while a
/// layer is open makes that layer read zero rows from it.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    entries: Arc<Entries>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` under `id`, replacing and returning any previous one.
    pub fn add(
        &self,
        id: &str,
        name: &str,
        source: Arc<dyn VectorSource>,
    ) -> Option<Arc<dyn VectorSource>> {
        let entry = RegisteredSource {
            name: name.to_string(),
            source,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), entry)
            .map(|e| e.source)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn VectorSource>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|e| e.source)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn VectorSource>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|e| e.source.clone())
    }

    /// Display name the source was registered with.
    pub fn name(&self, id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|e| e.name.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn handle(&self, id: &str) -> SourceHandle {
        SourceHandle {
            entries: Arc::downgrade(&self.entries),
            id: id.to_string(),
        }
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Non-owning, revocable reference to a registered source.
#[derive(Clone)]
pub(crate) struct SourceHandle {
    entries: Weak<Entries>,
    id: String,
}

impl SourceHandle {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// The source, if it is still registered.
    pub(crate) fn resolve(&self) -> Option<Arc<dyn VectorSource>> {
        let entries = self.entries.upgrade()?;
        let entries = entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&self.id).map(|e| e.source.clone())
    }
}

/// Opens sources of one kind from a connection string.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, connection: &str) -> Result<Arc<dyn VectorSource>>;
}

/// Providers available to embedded sources, keyed by name.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl Default for ProviderRegistry {
    /// The built-in `memory` and `delimitedtext` providers.
    fn default() -> Self {
        let mut registry = ProviderRegistry::empty();
        registry.register(Arc::new(MemoryProvider));
        registry.register(Arc::new(DelimitedTextProvider));
        registry
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        ProviderRegistry {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Opens `connection` with the provider called `provider`.
    pub fn open(&self, provider: &str, connection: &str) -> Result<Arc<dyn VectorSource>> {
        let p = self
            .get(provider)
            .ok_or_else(|| VirtualLayerError::UnknownProvider {
                provider: provider.to_string(),
            })?;
        p.open(connection).map_err(|e| match e {
            e @ VirtualLayerError::SourceOpenFailure { .. } => e,
            other => VirtualLayerError::SourceOpenFailure {
                provider: provider.to_string(),
                connection: connection.to_string(),
                msg: other.to_string(),
            },
        })
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}
