//! Backing store of a virtual layer.
//!
//! The configuration lives in three tables next to the virtual-table
//! declarations of the relations:
//!
//! * `_meta(version)`: layout version, currently `1`.
//! * `_tables(id, name, provider, source)`: row `0` holds the uid column in
//!   `name` and the query in `source`; rows `1..` are the embedded sources.
//! * `_columns(table_id, name, type)`: rows with `table_id = 0` are field
//!   overrides (`type` is a field type name) and the geometry column
//!   (`type` is `<kind code>:<srid>`, or `no::` for an explicit opt-out).

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::definition::{GeometrySpec, SourceKind, SourceLayer, VirtualLayerDefinition};
use crate::errors::{Result, VirtualLayerError};
use crate::vector::GeometryType;

const VERSION: i64 = 1;
const NO_GEOMETRY: &str = "no::";

/// An open backing store file.
pub(crate) struct BackingStore {
    pub conn: Connection,
    /// The definition still has to be written into the store.
    pub fresh: bool,
}

fn store_error(err: rusqlite::Error) -> VirtualLayerError {
    VirtualLayerError::BackingStore(err.to_string())
}

/// Settles which definition a layer opens with.
///
/// Without a path the definition is used as given. With one, a
/// configuration already stored there wins over the given parameters; a
/// path given without parameters must hold a configuration.
pub(crate) fn resolve_definition(
    definition: VirtualLayerDefinition,
) -> Result<(VirtualLayerDefinition, Option<BackingStore>)> {
    let Some(path) = definition.path().map(Path::to_path_buf) else {
        return Ok((definition, None));
    };
    let with_parameters = definition.has_parameters();
    if with_parameters && definition.has_referenced_layers() {
        return Err(VirtualLayerError::CannotStoreReferencedLayers);
    }
    if !with_parameters && !path.exists() {
        return Err(VirtualLayerError::ConfigurationError(format!(
            "No virtual layer parameters and no store at '{}'",
            path.display()
        )));
    }

    let conn = Connection::open(&path).map_err(store_error)?;
    match load_definition(&conn)? {
        Some(mut stored) => {
            if with_parameters {
                log::debug!(
                    "'{}' already holds a virtual layer, ignoring the given parameters",
                    path.display()
                );
            }
            stored.set_path(Some(path));
            Ok((stored, Some(BackingStore { conn, fresh: false })))
        }
        None if with_parameters => {
            log::debug!("Storing virtual layer into '{}'", path.display());
            Ok((definition, Some(BackingStore { conn, fresh: true })))
        }
        None => Err(VirtualLayerError::ConfigurationError(format!(
            "'{}' holds no virtual layer",
            path.display()
        ))),
    }
}

/// Reads the stored configuration, if any.
pub(crate) fn load_definition(conn: &Connection) -> Result<Option<VirtualLayerDefinition>> {
    let has_tables: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = '_tables'",
            [],
            |row| row.get(0),
        )
        .map_err(store_error)?;
    if !has_tables {
        return Ok(None);
    }

    let version: Option<i64> = conn
        .query_row("SELECT version FROM _meta", [], |row| row.get(0))
        .optional()
        .map_err(store_error)?;
    if version != Some(VERSION) {
        return Err(VirtualLayerError::BackingStore(format!(
            "Unsupported store version {version:?}"
        )));
    }

    let mut uid = None;
    let mut query = None;
    let mut sources = Vec::new();
    let mut stmt = conn
        .prepare("SELECT id, name, provider, source FROM _tables ORDER BY id")
        .map_err(store_error)?;
    let mut rows = stmt.query([]).map_err(store_error)?;
    while let Some(row) = rows.next().map_err(store_error)? {
        let id: i64 = row.get(0).map_err(store_error)?;
        let name: Option<String> = row.get(1).map_err(store_error)?;
        let provider: Option<String> = row.get(2).map_err(store_error)?;
        let source: Option<String> = row.get(3).map_err(store_error)?;
        if id == 0 {
            uid = name;
            query = source;
            continue;
        }
        match (name, provider, source) {
            (Some(alias), Some(provider), Some(connection)) => sources.push(SourceLayer {
                alias,
                kind: SourceKind::Embedded {
                    provider,
                    connection,
                },
            }),
            _ => {
                return Err(VirtualLayerError::BackingStore(format!(
                    "Incomplete source entry {id}"
                )))
            }
        }
    }

    let mut geometry = GeometrySpec::Inferred;
    let mut overrides = Vec::new();
    let mut stmt = conn
        .prepare("SELECT name, type FROM _columns WHERE table_id = 0 ORDER BY rowid")
        .map_err(store_error)?;
    let mut rows = stmt.query([]).map_err(store_error)?;
    while let Some(row) = rows.next().map_err(store_error)? {
        let name: String = row.get(0).map_err(store_error)?;
        let type_name: String = row.get(1).map_err(store_error)?;
        if type_name == NO_GEOMETRY {
            geometry = GeometrySpec::Absent;
        } else if let Some((kind, srid)) = type_name.split_once(':') {
            geometry = GeometrySpec::Explicit {
                column: name,
                kind: match kind {
                    "" => None,
                    code => code
                        .parse()
                        .ok()
                        .and_then(GeometryType::from_wkb_code)
                        .filter(GeometryType::has_geometry)
                        .map(Some)
                        .ok_or_else(|| {
                            VirtualLayerError::BackingStore(format!(
                                "Invalid geometry type '{type_name}'"
                            ))
                        })?,
                },
                srid: srid.parse().ok(),
            };
        } else {
            overrides.push((name, type_name.parse()?));
        }
    }

    Ok(Some(VirtualLayerDefinition::from_parts(
        sources, query, uid, geometry, overrides,
    )))
}

/// Writes the configuration tables. Only embedded sources can be stored.
pub(crate) fn write_definition(conn: &Connection, definition: &VirtualLayerDefinition) -> Result<()> {
    if definition.has_referenced_layers() {
        return Err(VirtualLayerError::CannotStoreReferencedLayers);
    }
    conn.execute_batch(
        "CREATE TABLE _meta(version INT);
         CREATE TABLE _tables(id INTEGER PRIMARY KEY, name TEXT, provider TEXT, source TEXT);
         CREATE TABLE _columns(table_id INT, name TEXT, type TEXT);",
    )
    .map_err(store_error)?;
    conn.execute("INSERT INTO _meta(version) VALUES (?1)", [VERSION])
        .map_err(store_error)?;
    conn.execute(
        "INSERT INTO _tables(id, name, provider, source) VALUES (0, ?1, NULL, ?2)",
        params![definition.uid(), definition.query()],
    )
    .map_err(store_error)?;

    for (i, source) in definition.sources().iter().enumerate() {
        if let SourceKind::Embedded {
            provider,
            connection,
        } = &source.kind
        {
            conn.execute(
                "INSERT INTO _tables(id, name, provider, source) VALUES (?1, ?2, ?3, ?4)",
                params![i as i64 + 1, source.alias, provider, connection],
            )
            .map_err(store_error)?;
        }
    }

    let mut columns: Vec<(String, String)> = definition
        .field_overrides()
        .iter()
        .map(|(name, field_type)| (name.clone(), field_type.name().to_string()))
        .collect();
    match definition.geometry() {
        GeometrySpec::Absent => columns.push((String::new(), NO_GEOMETRY.to_string())),
        GeometrySpec::Inferred => {}
        GeometrySpec::Explicit { column, kind, srid } => columns.push((
            column.clone(),
            format!(
                "{}:{}",
                kind.map(|k| k.wkb_code().to_string()).unwrap_or_default(),
                srid.map(|s| s.to_string()).unwrap_or_default()
            ),
        )),
    }
    for (name, type_name) in columns {
        conn.execute(
            "INSERT INTO _columns(table_id, name, type) VALUES (0, ?1, ?2)",
            params![name, type_name],
        )
        .map_err(store_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TempFixture;
    use crate::vector::FieldType;

    fn definition() -> VirtualLayerDefinition {
        VirtualLayerDefinition::new()
            .add_embedded("memory", "Point?crs=epsg:4326", Some("pts"))
            .add_embedded("delimitedtext", "/data/a.csv?wkt=wkt", None)
            .with_query("SELECT * FROM pts")
            .with_uid("id")
            .with_field_override("pop", FieldType::Integer64)
            .with_geometry(GeometrySpec::Explicit {
                column: "geometry".to_string(),
                kind: Some(GeometryType::Point),
                srid: None,
            })
    }

    #[test]
    fn test_write_then_load() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(load_definition(&conn).unwrap(), None);

        let def = definition();
        write_definition(&conn, &def).unwrap();
        assert_eq!(load_definition(&conn).unwrap(), Some(def));

        let conn = Connection::open_in_memory().unwrap();
        let def = VirtualLayerDefinition::new()
            .add_embedded("memory", "None", None)
            .with_geometry(GeometrySpec::Absent);
        write_definition(&conn, &def).unwrap();
        assert_eq!(load_definition(&conn).unwrap(), Some(def));
    }

    #[test]
    fn test_referenced_layers_are_refused_before_writing() {
        let store = TempFixture::empty("refs.sqlite");
        let def = VirtualLayerDefinition::new()
            .with_path(store.path())
            .add_reference("pts", None);
        assert!(matches!(
            resolve_definition(def),
            Err(VirtualLayerError::CannotStoreReferencedLayers)
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_stored_configuration_wins() {
        let store = TempFixture::empty("layer.sqlite");
        {
            let conn = Connection::open(store.path()).unwrap();
            write_definition(&conn, &definition()).unwrap();
        }

        let given = VirtualLayerDefinition::new()
            .with_path(store.path())
            .add_embedded("memory", "None", None);
        let (resolved, backing) = resolve_definition(given).unwrap();
        assert!(!backing.unwrap().fresh);
        assert_eq!(resolved.query(), Some("SELECT * FROM pts"));
        assert_eq!(resolved.path(), Some(store.path()));

        let plain = VirtualLayerDefinition::new().with_path(store.path());
        let (resolved, _) = resolve_definition(plain).unwrap();
        assert_eq!(resolved.sources().len(), 2);
    }

    #[test]
    fn test_plain_path_needs_configuration() {
        let store = TempFixture::empty("missing.sqlite");
        let plain = VirtualLayerDefinition::new().with_path(store.path());
        assert!(matches!(
            resolve_definition(plain),
            Err(VirtualLayerError::ConfigurationError(_))
        ));
        assert!(!store.path().exists());
    }
}
