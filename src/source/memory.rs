use std::sync::{Arc, PoisonError, RwLock};

use geo_types::Geometry;
use percent_encoding::percent_decode_str;

use super::{FeatureStream, Provider, SourceFeature, VectorSource};
use crate::errors::{Result, VirtualLayerError};
use crate::vector::ops::envelope;
use crate::vector::ops::predicates::rects_intersect;
use crate::vector::{FeatureFilter, FeatureRequest, FieldType, FieldValue, Fields, GeometryType, RequestFlags};

#[derive(Default)]
struct Store {
    features: Vec<SourceFeature>,
    next_fid: i64,
}

/// Features held in memory.
///
/// ```
/// use vlayer::source::{MemorySource, VectorSource};
/// use vlayer::vector::{FieldType, FieldValue, FeatureRequest, GeometryType};
///
/// let source = MemorySource::new(GeometryType::Point, 4326, &[("name", FieldType::String)]);
/// source.add_feature_fields(
///     Some(geo_types::point!(x: 1.0, y: 2.0).into()),
///     &["name"],
///     &[FieldValue::StringValue("a".to_string())],
/// ).unwrap();
/// assert_eq!(source.get_features(&FeatureRequest::new()).unwrap().count(), 1);
/// ```
pub struct MemorySource {
    fields: Fields,
    geometry_type: GeometryType,
    srid: i32,
    primary_key: Option<usize>,
    store: RwLock<Store>,
}

impl MemorySource {
    pub fn new(geometry_type: GeometryType, srid: i32, fields: &[(&str, FieldType)]) -> Self {
        MemorySource {
            fields: Fields::from_defn(fields),
            geometry_type,
            srid,
            primary_key: None,
            store: RwLock::new(Store {
                features: Vec::new(),
                next_fid: 1,
            }),
        }
    }

    /// Parses `<Kind>?crs=epsg:<srid>&field=<name>:<type>&...`.
    ///
    /// `Kind` is a geometry kind name or `None`; field types accept an
    /// optional length suffix such as `string(20)`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (kind, params) = uri.split_once('?').unwrap_or((uri, ""));
        let geometry_type = match kind.to_ascii_lowercase().as_str() {
            "none" | "nogeometry" => GeometryType::NoGeometry,
            _ => kind.parse()?,
        };
        let mut srid = 0;
        let mut fields = Vec::new();
        for param in params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            let value = percent_decode_str(value).decode_utf8_lossy();
            match key {
                "crs" => srid = parse_crs(&value)?,
                "field" => {
                    let (name, type_name) = value.split_once(':').ok_or_else(|| {
                        VirtualLayerError::ConfigurationError(format!(
                            "Expected <name>:<type> in field '{value}'"
                        ))
                    })?;
                    let type_name = type_name.split('(').next().unwrap_or(type_name);
                    fields.push((name.to_string(), type_name.parse::<FieldType>()?));
                }
                other => log::debug!("Ignoring memory source parameter '{other}'"),
            }
        }
        let defn: Vec<(&str, FieldType)> = fields.iter().map(|(n, t)| (n.as_str(), *t)).collect();
        Ok(MemorySource::new(geometry_type, srid, &defn))
    }

    /// Declares the attribute at `idx` as primary key: its integer value
    /// becomes the fid of every added feature.
    pub fn with_primary_key(mut self, idx: usize) -> Self {
        self.primary_key = Some(idx);
        self
    }

    /// Adds a feature and returns its fid.
    pub fn add_feature(
        &self,
        attributes: Vec<Option<FieldValue>>,
        geometry: Option<Geometry<f64>>,
    ) -> Result<i64> {
        if attributes.len() != self.fields.len() {
            return Err(VirtualLayerError::InvalidFieldIndex {
                index: attributes.len(),
            });
        }
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let fid = match self.primary_key {
            Some(pk) => attributes
                .get(pk)
                .cloned()
                .flatten()
                .and_then(FieldValue::into_int64)
                .ok_or(VirtualLayerError::InvalidFieldIndex { index: pk })?,
            None => store.next_fid,
        };
        store.next_fid = store.next_fid.max(fid.saturating_add(1));
        store.features.push(SourceFeature {
            fid,
            attributes,
            geometry,
        });
        Ok(fid)
    }

    /// Adds a feature from named values; unnamed fields stay null.
    pub fn add_feature_fields(
        &self,
        geometry: Option<Geometry<f64>>,
        field_names: &[&str],
        values: &[FieldValue],
    ) -> Result<i64> {
        let mut attributes = vec![None; self.fields.len()];
        for (name, value) in field_names.iter().zip(values) {
            let idx = self
                .fields
                .index_of(name)
                .ok_or_else(|| VirtualLayerError::InvalidFieldName {
                    field_name: name.to_string(),
                })?;
            attributes[idx] = Some(value.clone());
        }
        self.add_feature(attributes, geometry)
    }

    pub fn remove_feature(&self, fid: i64) -> bool {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let before = store.features.len();
        store.features.retain(|f| f.fid != fid);
        store.features.len() != before
    }

    pub fn clear(&self) {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .features
            .clear();
    }
}

pub(crate) fn parse_crs(value: &str) -> Result<i32> {
    value
        .to_ascii_lowercase()
        .strip_prefix("epsg:")
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| VirtualLayerError::ConfigurationError(format!("Unsupported crs '{value}'")))
}

/// Applies a request to one feature; `None` when the filter rejects it.
pub(crate) fn apply_request(
    feature: &SourceFeature,
    request: &FeatureRequest,
) -> Option<SourceFeature> {
    let selected = match request.filter() {
        FeatureFilter::None => true,
        FeatureFilter::Rect(rect) => feature
            .geometry
            .as_ref()
            .and_then(envelope)
            .is_some_and(|env| rects_intersect(&env, rect)),
        FeatureFilter::Fid(fid) => feature.fid == *fid,
        FeatureFilter::Fids(fids) => fids.contains(&feature.fid),
    };
    if !selected {
        return None;
    }
    let mut feature = feature.clone();
    if let Some(subset) = request.subset_of_attributes() {
        for (i, value) in feature.attributes.iter_mut().enumerate() {
            if !subset.contains(&i) {
                *value = None;
            }
        }
    }
    if request.flags().contains(RequestFlags::NO_GEOMETRY) {
        feature.geometry = None;
    }
    Some(feature)
}

impl VectorSource for MemorySource {
    fn fields(&self) -> Fields {
        self.fields.clone()
    }

    fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    fn srid(&self) -> i32 {
        self.srid
    }

    fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
    }

    fn feature_count(&self) -> Option<u64> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Some(store.features.len() as u64)
    }

    fn get_features(&self, request: &FeatureRequest) -> Result<FeatureStream> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let features: Vec<SourceFeature> = store
            .features
            .iter()
            .filter_map(|f| apply_request(f, request))
            .collect();
        Ok(Box::new(features.into_iter()))
    }
}

/// Provider `memory`: an empty [`MemorySource`] per open.
pub struct MemoryProvider;

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, connection: &str) -> Result<Arc<dyn VectorSource>> {
        Ok(Arc::new(MemorySource::from_uri(connection)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{point, Rect};

    fn towns() -> MemorySource {
        let source = MemorySource::new(
            GeometryType::Point,
            4326,
            &[("id", FieldType::Integer), ("name", FieldType::String)],
        )
        .with_primary_key(0);
        for (id, name, x, y) in [(10, "a", 0.0, 0.0), (20, "b", 5.0, 5.0), (30, "c", 9.0, 1.0)] {
            source
                .add_feature(
                    vec![
                        Some(FieldValue::IntegerValue(id)),
                        Some(FieldValue::StringValue(name.to_string())),
                    ],
                    Some(point!(x: x, y: y).into()),
                )
                .unwrap();
        }
        source
    }

    #[test]
    fn test_largest_primary_key() {
        let source = MemorySource::new(GeometryType::NoGeometry, 0, &[("id", FieldType::Integer64)])
            .with_primary_key(0);
        let fid = source
            .add_feature(vec![Some(FieldValue::Integer64Value(i64::MAX))], None)
            .unwrap();
        assert_eq!(fid, i64::MAX);
        let fid = source
            .add_feature(vec![Some(FieldValue::Integer64Value(-4))], None)
            .unwrap();
        assert_eq!(fid, -4);
        assert_eq!(source.feature_count(), Some(2));
    }

    #[test]
    fn test_from_uri() {
        let source = MemorySource::from_uri("Polygon?crs=EPSG:2154&field=id:integer&field=label:string(20)").unwrap();
        assert_eq!(source.geometry_type(), GeometryType::Polygon);
        assert_eq!(source.srid(), 2154);
        assert_eq!(source.fields().len(), 2);
        assert_eq!(source.fields().get(1).unwrap().field_type(), FieldType::String);

        let source = MemorySource::from_uri("None?field=x:real").unwrap();
        assert!(!source.has_geometry_type());
        assert!(MemorySource::from_uri("Circle").is_err());
        assert!(MemorySource::from_uri("Point?crs=wgs84").is_err());
    }

    #[test]
    fn test_primary_key_is_fid() {
        let source = towns();
        let fids: Vec<_> = source
            .get_features(&FeatureRequest::new().with_fid(20))
            .unwrap()
            .map(|f| f.fid)
            .collect();
        assert_eq!(fids, [20]);
    }

    #[test]
    fn test_rect_and_projection() {
        let source = towns();
        let request = FeatureRequest::new()
            .with_filter_rect(Rect::new((4.0, 4.0), (10.0, 10.0)))
            .with_subset_of_attributes(vec![1])
            .with_flags(RequestFlags::NO_GEOMETRY);
        let features: Vec<_> = source.get_features(&request).unwrap().collect();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].attributes[0], None);
        assert_eq!(
            features[0].attributes[1],
            Some(FieldValue::StringValue("b".to_string()))
        );
        assert!(features[0].geometry.is_none());
    }

    #[test]
    fn test_add_feature_fields() {
        let source = MemorySource::new(GeometryType::NoGeometry, 0, &[("a", FieldType::Real), ("b", FieldType::Integer)]);
        let fid = source
            .add_feature_fields(None, &["b"], &[FieldValue::IntegerValue(3)])
            .unwrap();
        assert_eq!(fid, 1);
        assert!(source
            .add_feature_fields(None, &["zzz"], &[FieldValue::IntegerValue(3)])
            .is_err());
        assert!(source.remove_feature(1));
        assert_eq!(source.feature_count(), Some(0));
    }
}
