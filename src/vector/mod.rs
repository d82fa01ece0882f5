//! Virtual layer features
//!
//! ## Reading
//!
//! ```
//! use vlayer::source::SourceRegistry;
//! use vlayer::vector::FeatureRequest;
//! use vlayer::VirtualLayer;
//!
//! let uri = format!(
//!     "?layer=delimitedtext:{}%3Fx%3Dx%26y%3Dy:points&query=SELECT%20id%2C%20name%2C%20geometry%20FROM%20points&uid=id",
//!     concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/points.csv"),
//! );
//! let layer = VirtualLayer::open(&uri, &SourceRegistry::new()).unwrap();
//! let mut result_set = layer.get_features(&FeatureRequest::new());
//! for feature in result_set.features() {
//!     let feature = feature.unwrap();
//!     let name = feature.field_as_string(0).unwrap();
//!     println!("{} {:?} {:?}", feature.fid(), name, feature.geometry());
//! }
//! ```

pub use crate::vector::defn::{Field, FieldType, Fields};
pub use crate::vector::feature::{Feature, FieldValue};
pub use crate::vector::geometry::GeometryType;
pub use crate::vector::layer::{FeatureIterator, ResultSet, VirtualLayer};
pub use crate::vector::request::{Capabilities, FeatureFilter, FeatureRequest, RequestFlags};

mod defn;
pub(crate) mod feature;
mod geometry;
mod layer;
pub mod ops;
mod request;
