use std::path::{Path, PathBuf};
use std::sync::Arc;

use geo_types::point;

use crate::source::MemorySource;
use crate::vector::{FieldType, FieldValue, GeometryType};

/// A struct that contains a temporary directory and a path to a file in that directory.
pub struct TempFixture {
    _temp_dir: tempfile::TempDir,
    temp_path: PathBuf,
}

impl TempFixture {
    /// Creates a temporary directory and path to a non-existent file with given `name`.
    /// Useful for backing stores created by a test.
    pub fn empty(name: &str) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let temp_path = _temp_dir.path().join(name);
        Self {
            _temp_dir,
            temp_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

/// Returns the fully qualified path to `filename` in `${CARGO_MANIFEST_DIR}/fixtures`.
pub fn fixture(filename: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(filename)
}

/// `n` points `(i, i)` with attributes `id = i`, `name = "p<i>"` and
/// `value = i * 1.5`, for `i` in `1..=n`. The id is the primary key.
pub fn point_source(n: i32) -> Arc<MemorySource> {
    let source = MemorySource::new(
        GeometryType::Point,
        4326,
        &[
            ("id", FieldType::Integer),
            ("name", FieldType::String),
            ("value", FieldType::Real),
        ],
    )
    .with_primary_key(0);
    for i in 1..=n {
        source
            .add_feature(
                vec![
                    Some(FieldValue::IntegerValue(i)),
                    Some(FieldValue::StringValue(format!("p{i}"))),
                    Some(FieldValue::RealValue(f64::from(i) * 1.5)),
                ],
                Some(point!(x: f64::from(i), y: f64::from(i)).into()),
            )
            .unwrap();
    }
    Arc::new(source)
}

/// Assert numerical difference between two expressions is less than
/// 64-bit machine epsilon or a specified epsilon.
#[macro_export]
macro_rules! assert_near {
    ($left:expr, $right:expr) => {
        assert_near!($left, $right, epsilon = f64::EPSILON)
    };
    ($left:expr, $right:expr, epsilon = $ep:expr) => {
        assert!(
            ($left - $right).abs() < $ep,
            "|{} - {}| = {} is greater than epsilon {:.4e}",
            $left,
            $right,
            ($left - $right).abs(),
            $ep
        )
    };
}
