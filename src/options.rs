use crate::source::{ProviderRegistry, SourceRegistry};

/// Open options for [`crate::VirtualLayer::open_ex`].
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Sources that `reference=` entries resolve against.
    pub sources: SourceRegistry,
    /// Providers that `layer=` entries are opened with.
    pub providers: ProviderRegistry,
    /// Upper bound on the rows read while looking for a non-null geometry
    /// to infer the geometry kind from. `None` reads until one is found.
    pub scan_limit: Option<usize>,
}
