use thiserror::Error;

pub type Result<T> = std::result::Result<T, VirtualLayerError>;

#[derive(Clone, Debug, Error)]
pub enum VirtualLayerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("{0}")]
    NameResolutionError(String),
    #[error("Result column #{index} has no name")]
    AmbiguousColumnName { index: usize },
    #[error("Can't deduce the geometry type of the geometry field '{column}'")]
    UndeterminableGeometryType { column: String },
    #[error("Cannot find the specified geometry field '{column}'")]
    UnknownGeometryColumn { column: String },
    #[error("Cannot store referenced layers")]
    CannotStoreReferencedLayers,
    #[error("Provider '{provider}' cannot open '{connection}': {msg}")]
    SourceOpenFailure {
        provider: String,
        connection: String,
        msg: String,
    },
    #[error("Query execution error: {0}")]
    QueryExecutionError(String),
    #[error("Cannot find layer {reference}")]
    UnknownSource { reference: String },
    #[error("Unknown provider '{provider}'")]
    UnknownProvider { provider: String },
    #[error("Invalid geometry blob: {0}")]
    InvalidGeometryBlob(String),
    #[error("Invalid WKT: {0}")]
    InvalidWkt(String),
    #[error("Invalid field name '{field_name}'")]
    InvalidFieldName { field_name: String },
    #[error("Invalid field index {index}")]
    InvalidFieldIndex { index: usize },
    #[error("Backing store error: {0}")]
    BackingStore(String),
    #[error("SQLite error: {0}")]
    Sqlite(String),
}

impl From<rusqlite::Error> for VirtualLayerError {
    fn from(err: rusqlite::Error) -> Self {
        VirtualLayerError::Sqlite(err.to_string())
    }
}

/// The engine's own text, without the statement and offset rusqlite appends
/// to prepare errors.
fn engine_message(err: rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg))
        | rusqlite::Error::SqlInputError { msg, .. } => msg,
        other => other.to_string(),
    }
}

impl VirtualLayerError {
    /// Classifies an engine error raised while preparing or running the
    /// user query. Name lookup failures keep the engine text unmodified.
    pub(crate) fn from_query_error(err: rusqlite::Error) -> Self {
        let msg = engine_message(err);
        if msg.starts_with("no such table") || msg.starts_with("no such column") {
            VirtualLayerError::NameResolutionError(msg)
        } else {
            VirtualLayerError::QueryExecutionError(msg)
        }
    }

    /// Classifies an engine error raised by a feature request. These never
    /// invalidate the layer, whatever the cause.
    pub(crate) fn from_fetch_error(err: rusqlite::Error) -> Self {
        VirtualLayerError::QueryExecutionError(engine_message(err))
    }

    /// Wraps the error so it can travel through a user-defined SQL function
    /// or a virtual-table callback.
    pub(crate) fn into_sqlite(self) -> rusqlite::Error {
        rusqlite::Error::ModuleError(self.to_string())
    }
}
