//! Parsing and formatting of virtual layer definitions.
//!
//! A definition is written as `[<store path>]?<key>=<value>&...`:
//!
//! | key | value |
//! |-----|-------|
//! | `reference` (or `layer_ref`) | `<source id>[:<alias>]`, repeatable |
//! | `layer` | `<provider>:<percent-encoded connection>[:<alias>]`, repeatable |
//! | `query` | percent-encoded SQL |
//! | `uid` | name of the id column |
//! | `geometry` | `<column>[:<kind>:<srid>]` |
//! | `nogeometry` | no value |
//! | `field` | `<column>:<type>`, repeatable |
//!
//! Sources without an alias are named `vtab1`, `vtab2`, ... by position.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use geo_types::Rect;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::{Result, VirtualLayerError};
use crate::vector::{FieldType, GeometryType};

const PARAM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where the rows of one source come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// An already open source, resolved by id through a
    /// [`SourceRegistry`](crate::source::SourceRegistry).
    Reference { id: String },
    /// A source opened by the virtual layer itself through a
    /// [`Provider`](crate::source::Provider).
    Embedded {
        provider: String,
        connection: String,
    },
}

/// One named input of a virtual layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLayer {
    pub alias: String,
    pub kind: SourceKind,
}

/// How the output geometry column is chosen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GeometrySpec {
    /// The layer has no geometry, even if the result carries one.
    Absent,
    /// Pick the geometry column from the result.
    #[default]
    Inferred,
    /// Use `column`; a missing kind or srid is inferred.
    Explicit {
        column: String,
        kind: Option<GeometryType>,
        srid: Option<i32>,
    },
}

/// Immutable configuration of a virtual layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualLayerDefinition {
    path: Option<PathBuf>,
    sources: Vec<SourceLayer>,
    query: Option<String>,
    uid: Option<String>,
    geometry: GeometrySpec,
    field_overrides: Vec<(String, FieldType)>,
    spatial_filter: Option<Rect<f64>>,
}

fn decode(value: &str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|e| VirtualLayerError::ConfigurationError(format!("Invalid encoding in '{value}': {e}")))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, PARAM_VALUE).to_string()
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl VirtualLayerDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `[<path>]?<params>`.
    ///
    /// ```
    /// use vlayer::VirtualLayerDefinition;
    ///
    /// let def = VirtualLayerDefinition::from_uri(
    ///     "?layer=memory:Point%3Fcrs%3Depsg%3A4326:pts&query=SELECT%20*%20FROM%20pts&uid=id",
    /// ).unwrap();
    /// assert_eq!(def.sources()[0].alias, "pts");
    /// assert_eq!(def.query(), Some("SELECT * FROM pts"));
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (path, params) = match uri.split_once('?') {
            Some((path, params)) => (path, params),
            None => (uri, ""),
        };
        let pairs: Vec<(&str, &str)> = params
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .collect();
        let mut def = Self::from_params(&pairs)?;
        if !path.is_empty() {
            def.path = Some(PathBuf::from(path));
        }
        Ok(def)
    }

    /// Parses an ordered list of raw (still percent-encoded) key/value pairs.
    ///
    /// Unknown keys are skipped; malformed values of known keys fail.
    pub fn from_params(params: &[(&str, &str)]) -> Result<Self> {
        let mut def = Self::default();
        let mut geometry_seen = false;
        let mut no_geometry = false;

        for &(key, value) in params {
            match key {
                "reference" | "layer_ref" => {
                    let (id, alias) = match value.split_once(':') {
                        Some((id, alias)) => (id, Some(decode(alias)?)),
                        None => (value, None),
                    };
                    if id.is_empty() {
                        return Err(VirtualLayerError::ConfigurationError(format!(
                            "Missing source id in '{value}'"
                        )));
                    }
                    let kind = SourceKind::Reference { id: decode(id)? };
                    def.push_source(kind, alias);
                }
                "layer" => {
                    // split before decoding, the connection itself may contain ':'
                    let mut parts = value.splitn(3, ':');
                    let provider = parts.next().unwrap_or_default();
                    let connection = parts.next().ok_or_else(|| {
                        VirtualLayerError::ConfigurationError(format!(
                            "Expected <provider>:<connection> in layer '{value}'"
                        ))
                    })?;
                    if provider.is_empty() {
                        return Err(VirtualLayerError::ConfigurationError(format!(
                            "Missing provider in layer '{value}'"
                        )));
                    }
                    let alias = parts.next().map(decode).transpose()?;
                    let kind = SourceKind::Embedded {
                        provider: decode(provider)?,
                        connection: decode(connection)?,
                    };
                    def.push_source(kind, alias);
                }
                "query" => def.query = Some(decode(value)?),
                "uid" => def.uid = Some(decode(value)?),
                "geometry" => {
                    def.geometry = Self::parse_geometry(&decode(value)?)?;
                    geometry_seen = true;
                }
                "nogeometry" => no_geometry = true,
                "field" => {
                    let value = decode(value)?;
                    let (name, type_name) = value
                        .split_once(':')
                        .filter(|(name, _)| is_identifier(name))
                        .ok_or_else(|| {
                            VirtualLayerError::ConfigurationError(format!(
                                "Expected <name>:<type> in field '{value}'"
                            ))
                        })?;
                    def.field_overrides
                        .push((name.to_string(), type_name.parse()?));
                }
                other => log::debug!("Ignoring unknown virtual layer parameter '{other}'"),
            }
        }

        if geometry_seen && no_geometry {
            return Err(VirtualLayerError::ConfigurationError(
                "'geometry' and 'nogeometry' cannot be used together".to_string(),
            ));
        }
        if no_geometry {
            def.geometry = GeometrySpec::Absent;
        }
        Ok(def)
    }

    fn parse_geometry(value: &str) -> Result<GeometrySpec> {
        let invalid = || {
            VirtualLayerError::ConfigurationError(format!(
                "Expected <column>[:<kind>:<srid>] in geometry '{value}'"
            ))
        };
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [column] if is_identifier(column) => Ok(GeometrySpec::Explicit {
                column: column.to_string(),
                kind: None,
                srid: None,
            }),
            [column, kind, srid] if is_identifier(column) => Ok(GeometrySpec::Explicit {
                column: column.to_string(),
                kind: Some(kind.parse()?),
                srid: Some(srid.parse().map_err(|_| invalid())?),
            }),
            _ => Err(invalid()),
        }
    }

    fn push_source(&mut self, kind: SourceKind, alias: Option<String>) {
        let alias = alias
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| format!("vtab{}", self.sources.len() + 1));
        self.sources.push(SourceLayer { alias, kind });
    }

    /// Formats the definition so that [`VirtualLayerDefinition::from_uri`]
    /// reads it back unchanged.
    pub fn to_uri(&self) -> String {
        let mut params = Vec::new();
        for source in &self.sources {
            match &source.kind {
                SourceKind::Reference { id } => {
                    params.push(format!("reference={}:{}", encode(id), encode(&source.alias)))
                }
                SourceKind::Embedded {
                    provider,
                    connection,
                } => params.push(format!(
                    "layer={}:{}:{}",
                    encode(provider),
                    encode(connection),
                    encode(&source.alias)
                )),
            }
        }
        match &self.geometry {
            GeometrySpec::Absent => params.push("nogeometry".to_string()),
            GeometrySpec::Inferred => {}
            GeometrySpec::Explicit { column, kind, srid } => {
                let mut value = column.clone();
                if let Some(kind) = kind {
                    let _ = write!(value, ":{}:{}", kind.wkb_code(), srid.unwrap_or(0));
                }
                params.push(format!("geometry={}", encode(&value)));
            }
        }
        if let Some(uid) = &self.uid {
            params.push(format!("uid={}", encode(uid)));
        }
        for (name, field_type) in &self.field_overrides {
            params.push(format!("field={}", encode(&format!("{name}:{field_type}"))));
        }
        if let Some(query) = &self.query {
            params.push(format!("query={}", encode(query)));
        }

        let path = self
            .path
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{path}?{}", params.join("&"))
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Adds a reference to an open source; `alias` defaults to `vtab<N>`.
    pub fn add_reference(mut self, id: &str, alias: Option<&str>) -> Self {
        let kind = SourceKind::Reference { id: id.to_string() };
        self.push_source(kind, alias.map(str::to_string));
        self
    }

    /// Adds a source opened through `provider`; `alias` defaults to `vtab<N>`.
    pub fn add_embedded(mut self, provider: &str, connection: &str, alias: Option<&str>) -> Self {
        let kind = SourceKind::Embedded {
            provider: provider.to_string(),
            connection: connection.to_string(),
        };
        self.push_source(kind, alias.map(str::to_string));
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    pub fn with_geometry(mut self, geometry: GeometrySpec) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_field_override(mut self, name: &str, field_type: FieldType) -> Self {
        self.field_overrides.push((name.to_string(), field_type));
        self
    }

    /// Rectangle applied to every request that carries no filter of its own.
    pub fn with_spatial_filter(mut self, rect: Rect<f64>) -> Self {
        self.spatial_filter = Some(rect);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn sources(&self) -> &[SourceLayer] {
        &self.sources
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn geometry(&self) -> &GeometrySpec {
        &self.geometry
    }

    pub fn field_overrides(&self) -> &[(String, FieldType)] {
        &self.field_overrides
    }

    pub fn spatial_filter(&self) -> Option<Rect<f64>> {
        self.spatial_filter
    }

    pub fn has_referenced_layers(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s.kind, SourceKind::Reference { .. }))
    }

    /// Whether anything beyond a store path was given.
    pub fn has_parameters(&self) -> bool {
        !self.sources.is_empty()
            || self.query.is_some()
            || self.uid.is_some()
            || self.geometry != GeometrySpec::Inferred
            || !self.field_overrides.is_empty()
    }

    pub(crate) fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    /// Parsed back from a backing store.
    pub(crate) fn from_parts(
        sources: Vec<SourceLayer>,
        query: Option<String>,
        uid: Option<String>,
        geometry: GeometrySpec,
        field_overrides: Vec<(String, FieldType)>,
    ) -> Self {
        VirtualLayerDefinition {
            path: None,
            sources,
            query,
            uid,
            geometry,
            field_overrides,
            spatial_filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_aliases_share_one_counter() {
        let def = VirtualLayerDefinition::from_uri(
            "?reference=a&layer=memory:Point&reference=b:roads&layer=delimitedtext:f.csv",
        )
        .unwrap();
        let aliases: Vec<_> = def.sources().iter().map(|s| s.alias.as_str()).collect();
        assert_eq!(aliases, ["vtab1", "vtab2", "roads", "vtab4"]);
        assert!(def.has_referenced_layers());
    }

    #[test]
    fn test_connection_is_split_before_decoding() {
        let def = VirtualLayerDefinition::from_uri(
            "?layer=delimitedtext:%2Ftmp%2Fa.csv%3Fdelimiter%3D%3A:pts",
        )
        .unwrap();
        assert_eq!(
            def.sources()[0].kind,
            SourceKind::Embedded {
                provider: "delimitedtext".to_string(),
                connection: "/tmp/a.csv?delimiter=:".to_string(),
            }
        );
        assert_eq!(def.sources()[0].alias, "pts");
    }

    #[test]
    fn test_geometry_descriptor() {
        let def = VirtualLayerDefinition::from_uri("?geometry=geom:polygon:4326").unwrap();
        assert_eq!(
            def.geometry(),
            &GeometrySpec::Explicit {
                column: "geom".to_string(),
                kind: Some(GeometryType::Polygon),
                srid: Some(4326),
            }
        );
        let def = VirtualLayerDefinition::from_uri("?geometry=geom:1:0").unwrap();
        assert!(matches!(
            def.geometry(),
            GeometrySpec::Explicit { kind: Some(GeometryType::Point), .. }
        ));

        for bad in ["?geometry=geom:circle:4326", "?geometry=geom:point", "?geometry=a%20b"] {
            let err = VirtualLayerDefinition::from_uri(bad).unwrap_err();
            assert!(matches!(err, VirtualLayerError::ConfigurationError(_)), "{bad}");
        }
    }

    #[test]
    fn test_geometry_and_nogeometry_conflict() {
        let err = VirtualLayerDefinition::from_uri("?geometry=geom&nogeometry").unwrap_err();
        assert!(matches!(err, VirtualLayerError::ConfigurationError(_)));

        let def = VirtualLayerDefinition::from_uri("?nogeometry").unwrap();
        assert_eq!(def.geometry(), &GeometrySpec::Absent);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let def = VirtualLayerDefinition::from_uri("?uid=id&colour=blue&query=SELECT%201").unwrap();
        assert_eq!(def.uid(), Some("id"));
        assert_eq!(def.query(), Some("SELECT 1"));
    }

    #[test]
    fn test_field_overrides() {
        let def = VirtualLayerDefinition::from_uri("?field=pop:int&field=ratio:double").unwrap();
        assert_eq!(
            def.field_overrides(),
            &[
                ("pop".to_string(), FieldType::Integer),
                ("ratio".to_string(), FieldType::Real)
            ]
        );
        assert!(VirtualLayerDefinition::from_uri("?field=pop:varchar").is_err());
        assert!(VirtualLayerDefinition::from_uri("?field=pop").is_err());
    }

    #[test]
    fn test_to_uri_reads_back() {
        let def = VirtualLayerDefinition::new()
            .with_path("/tmp/store.sqlite")
            .add_reference("layer:1", None)
            .add_embedded("delimitedtext", "/data/a b.csv?wkt=shape&delimiter=;", Some("towns"))
            .with_query("SELECT t.*, 'x&y' AS tag FROM towns t WHERE name = 'a=b'")
            .with_uid("id")
            .with_geometry(GeometrySpec::Explicit {
                column: "shape".to_string(),
                kind: Some(GeometryType::MultiPolygon),
                srid: Some(2154),
            })
            .with_field_override("pop", FieldType::Integer64);
        let parsed = VirtualLayerDefinition::from_uri(&def.to_uri()).unwrap();
        assert_eq!(parsed, def);

        let def = VirtualLayerDefinition::new()
            .add_embedded("memory", "Point", None)
            .with_geometry(GeometrySpec::Absent);
        assert_eq!(VirtualLayerDefinition::from_uri(&def.to_uri()).unwrap(), def);
    }

    #[test]
    fn test_has_parameters() {
        assert!(!VirtualLayerDefinition::from_uri("/tmp/x.sqlite").unwrap().has_parameters());
        assert!(VirtualLayerDefinition::from_uri("/tmp/x.sqlite?uid=id").unwrap().has_parameters());
    }
}
