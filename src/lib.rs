//! Virtual vector layers for Rust.
//!
//! A virtual layer runs one SQL query over any number of vector sources,
//! registered ones or sources it opens itself, and reads the result back as
//! features with an id, attributes and a geometry. No data is copied: every
//! source is exposed to an embedded SQLite engine as a virtual table.
//!
//! ## Use
//!
//! ```
//! use std::sync::Arc;
//! use geo_types::line_string;
//! use vlayer::source::{MemorySource, SourceRegistry};
//! use vlayer::vector::{FeatureRequest, FieldType, FieldValue, GeometryType};
//! use vlayer::{VirtualLayer, VirtualLayerDefinition};
//!
//! let roads = MemorySource::new(GeometryType::LineString, 4326, &[("kind", FieldType::String)]);
//! roads
//!     .add_feature_fields(
//!         Some(geo_types::line_string![(x: 0., y: 0.), (x: 1., y: 1.)].into()),
//!         &["kind"],
//!         &[FieldValue::StringValue("pedestrian".to_string())],
//!     )
//!     .unwrap();
//! let sources = SourceRegistry::new();
//! sources.add("roads-1", "roads", Arc::new(roads));
//!
//! let definition = VirtualLayerDefinition::new()
//!     .add_reference("roads-1", Some("roads"))
//!     .with_query("SELECT kind, geometry FROM roads WHERE kind = 'pedestrian'");
//! let layer = VirtualLayer::from_definition(
//!     definition,
//!     vlayer::OpenOptions {
//!         sources,
//!         ..Default::default()
//!     },
//! )
//! .unwrap();
//!
//! assert_eq!(layer.geometry_type(), GeometryType::LineString);
//! let mut result_set = layer.get_features(&FeatureRequest::new());
//! for feature in result_set.features() {
//!     let feature = feature.unwrap();
//!     let kind = feature.field_by_name("kind").unwrap().unwrap().into_string().unwrap();
//!     assert_eq!(kind, "pedestrian");
//! }
//! ```

#![crate_name = "vlayer"]
#![crate_type = "lib"]

pub mod definition;
pub mod errors;
mod options;
pub mod source;
mod sql;
mod store;
mod utils;
pub mod vector;

pub use definition::VirtualLayerDefinition;
pub use options::OpenOptions;
pub use vector::VirtualLayer;

#[cfg(test)]
mod test_utils;
