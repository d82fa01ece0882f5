use std::path::{Path, PathBuf};

use vlayer::errors::VirtualLayerError;
use vlayer::source::SourceRegistry;
use vlayer::vector::{FeatureRequest, FieldType, GeometryType};
use vlayer::{OpenOptions, VirtualLayer, VirtualLayerDefinition};

fn fixture(filename: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(filename)
}

fn points() -> String {
    format!("{}?x=x&y=y", fixture("points.csv").display())
}

fn regions() -> String {
    format!("{}?delimiter=;&wkt=wkt", fixture("regions.csv").display())
}

fn open(definition: VirtualLayerDefinition) -> Result<VirtualLayer, VirtualLayerError> {
    VirtualLayer::from_definition(definition, OpenOptions::default())
}

#[test]
fn test_spatial_join() {
    let layer = open(
        VirtualLayerDefinition::new()
            .add_embedded("delimitedtext", &points(), Some("points"))
            .add_embedded("delimitedtext", &regions(), Some("regions"))
            .with_query(
                "SELECT p.id, p.name, r.name AS region, p.geometry \
                 FROM points p JOIN regions r ON Intersects(p.geometry, r.geometry)",
            )
            .with_uid("id"),
    )
    .unwrap();

    assert_eq!(layer.geometry_type(), GeometryType::Point);
    let names: Vec<_> = layer.fields().iter().map(|f| f.name().to_string()).collect();
    assert_eq!(names, ["name", "region"]);
    assert_eq!(layer.feature_count().unwrap(), 7);

    let mut result_set = layer.get_features(&FeatureRequest::new());
    let rows: Vec<(i64, String)> = result_set
        .features()
        .map(|f| {
            let f = f.unwrap();
            (f.fid(), f.field_as_string(1).unwrap().unwrap())
        })
        .collect();
    let mut expected: Vec<(i64, String)> = (1..=4).map(|i| (i, "south, west".to_string())).collect();
    expected.extend((5..=7).map(|i| (i, "centre".to_string())));
    assert_eq!(rows, expected);
}

#[test]
fn test_geometry_and_field_types() {
    let layer = VirtualLayer::open(
        &format!(
            "?layer=delimitedtext:{}%3Fdelimiter%3D%3B%26wkt%3Dwkt:regions\
             &query=SELECT%20id%2C%20name%2C%20geometry%20FROM%20regions\
             &field=id:text",
            fixture("regions.csv").display()
        ),
        &SourceRegistry::new(),
    )
    .unwrap();
    assert_eq!(layer.geometry_type(), GeometryType::Polygon);
    assert_eq!(layer.fields().get(0).unwrap().field_type(), FieldType::String);
    assert_eq!(layer.capabilities(), vlayer::vector::Capabilities::empty());
    let extent = layer.extent().unwrap().unwrap();
    assert_eq!(extent.min().x, 0.0);
    assert_eq!(extent.max().y, 30.0);
}

#[test]
fn test_query_errors() {
    let base = || {
        VirtualLayerDefinition::new().add_embedded("delimitedtext", &points(), Some("points"))
    };

    let err = open(base().with_query("SELECT id, name FROM points").with_geometry(
        vlayer::definition::GeometrySpec::Explicit {
            column: "shape".to_string(),
            kind: None,
            srid: None,
        },
    ))
    .err()
    .unwrap();
    assert!(matches!(err, VirtualLayerError::UnknownGeometryColumn { column } if column == "shape"));

    let err = open(base().with_query("SELECT 1, name FROM points")).err().unwrap();
    assert!(matches!(err, VirtualLayerError::AmbiguousColumnName { index: 1 }));

    let err = open(base().with_query("SELECT * FROM points").with_uid("fid")).err().unwrap();
    assert!(matches!(err, VirtualLayerError::NameResolutionError(_)));

    let err = open(
        VirtualLayerDefinition::new().add_embedded("delimitedtext", "/nonexistent.csv", None),
    )
    .err()
    .unwrap();
    assert!(matches!(err, VirtualLayerError::SourceOpenFailure { .. }));
}

#[test]
fn test_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("points.sqlite");

    let definition = VirtualLayerDefinition::new()
        .with_path(&store)
        .add_embedded("delimitedtext", &points(), Some("points"))
        .with_query("SELECT * FROM points WHERE value > 5")
        .with_uid("id");
    let (field_count, feature_count) = {
        let layer = open(definition.clone()).unwrap();
        (layer.field_count(), layer.feature_count().unwrap())
    };
    assert_eq!(field_count, 4);
    assert_eq!(feature_count, 7);
    assert!(store.exists());

    let layer = VirtualLayer::open(&store.display().to_string(), &SourceRegistry::new()).unwrap();
    assert_eq!(layer.geometry_type(), GeometryType::Point);
    assert_eq!(layer.field_count(), field_count);
    assert_eq!(layer.feature_count().unwrap(), feature_count);
    assert_eq!(layer.definition().query(), definition.query());
    assert_eq!(layer.uid_column(), Some("id"));

    let mut result_set = layer.get_features(&FeatureRequest::new().with_fid(9));
    let names: Vec<_> = result_set
        .features()
        .map(|f| f.unwrap().field_by_name("name").unwrap().unwrap().to_string())
        .collect();
    assert_eq!(names, ["india"]);
}

#[test]
fn test_referenced_layers_cannot_be_stored() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("refs.sqlite");
    let err = open(
        VirtualLayerDefinition::new()
            .with_path(&store)
            .add_reference("anything", None),
    )
    .err()
    .unwrap();
    assert!(matches!(err, VirtualLayerError::CannotStoreReferencedLayers));
    assert!(!store.exists());
}

#[test]
fn test_uri_round_trip() {
    let uri = format!(
        "?layer=delimitedtext:{}:pts&query=SELECT%20*%20FROM%20pts&uid=id&nogeometry",
        fixture("points.csv").display()
    );
    let definition = VirtualLayerDefinition::from_uri(&uri).unwrap();
    assert_eq!(VirtualLayerDefinition::from_uri(&definition.to_uri()).unwrap(), definition);

    let layer = open(definition).unwrap();
    assert_eq!(layer.geometry_type(), GeometryType::NoGeometry);
    assert_eq!(layer.feature_count().unwrap(), 10);
    assert_eq!(layer.extent().unwrap(), None);
}
