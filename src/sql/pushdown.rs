use geo_types::Rect;
use rusqlite::types::Value;

use super::relation::SEARCH_FRAME;
use super::schema::ResultSchema;
use crate::definition::VirtualLayerDefinition;
use crate::utils::quote_identifier;
use crate::vector::{FeatureFilter, FeatureRequest, RequestFlags};

/// Alias of the effective query inside generated statements.
const VIEW: &str = "_view";

/// A statement with its positional parameters.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RowQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

fn rect_params(rect: &Rect<f64>) -> [Value; 4] {
    [
        Value::Real(rect.min().x),
        Value::Real(rect.min().y),
        Value::Real(rect.max().x),
        Value::Real(rect.max().y),
    ]
}

fn view_column(name: &str) -> String {
    format!("{VIEW}.{}", quote_identifier(name))
}

fn subset_condition(subset: Option<&str>) -> Option<String> {
    subset
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("({s})"))
}

/// Nests `query` under the view alias. The closing parenthesis goes on its
/// own line so a trailing line comment cannot swallow it.
pub(crate) fn wrap_query(query: &str) -> String {
    format!("SELECT * FROM ({query}\n) AS {VIEW}")
}

/// Rewrites `request` into a statement over the effective query.
///
/// The subset string and the filter become `WHERE` conjuncts. A rectangle
/// is tested against the geometry column, and in pass-through mode it is
/// also handed to the relation through its search frame. Id filters only
/// become predicates when a uid column exists; otherwise the caller drops
/// the rows itself.
pub(crate) fn build_row_query(
    definition: &VirtualLayerDefinition,
    schema: &ResultSchema,
    effective_query: &str,
    subset: Option<&str>,
    request: &FeatureRequest,
) -> RowQuery {
    let mut inner = effective_query.to_string();
    let mut params = Vec::new();
    let mut conditions: Vec<String> = subset_condition(subset).into_iter().collect();

    let default_filter = definition.spatial_filter().map(FeatureFilter::Rect);
    let filter = match (request.filter(), &default_filter) {
        (FeatureFilter::None, Some(filter)) => filter,
        (filter, _) => filter,
    };

    match filter {
        FeatureFilter::Rect(rect) => {
            if let Some(geometry) = &schema.geometry {
                if let (None, [source]) = (definition.query(), definition.sources()) {
                    inner = format!(
                        "SELECT * FROM {} WHERE {} = BuildMbr(?, ?, ?, ?)",
                        quote_identifier(&source.alias),
                        quote_identifier(SEARCH_FRAME)
                    );
                    params.extend(rect_params(rect));
                }
                let column = view_column(&geometry.name);
                if request.flags().contains(RequestFlags::EXACT_INTERSECT) {
                    conditions.push(format!(
                        "Intersects({column}, BuildMbr(?, ?, ?, ?, {}))",
                        geometry.srid
                    ));
                } else {
                    conditions.push(format!(
                        "BboxIntersects({column}, ?, ?, ?, ?, {})",
                        geometry.srid
                    ));
                }
                params.extend(rect_params(rect));
            }
        }
        FeatureFilter::Fid(fid) => {
            if let Some(uid) = &schema.uid {
                conditions.push(format!("{} = ?", view_column(&uid.name)));
                params.push(Value::Integer(*fid));
            }
        }
        FeatureFilter::Fids(fids) => {
            if let Some(uid) = &schema.uid {
                if fids.is_empty() {
                    conditions.push("0".to_string());
                } else {
                    let placeholders = vec!["?"; fids.len()].join(", ");
                    conditions.push(format!("{} IN ({placeholders})", view_column(&uid.name)));
                    params.extend(fids.iter().map(|fid| Value::Integer(*fid)));
                }
            }
        }
        FeatureFilter::None => {}
    }

    let mut sql = wrap_query(&inner);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    log::debug!("Feature query: {sql}");
    RowQuery { sql, params }
}

/// Count and extent of the effective query under the subset string.
pub(crate) fn statistics_query(
    schema: &ResultSchema,
    effective_query: &str,
    subset: Option<&str>,
) -> String {
    let mut sql = match &schema.geometry {
        Some(geometry) => {
            let column = view_column(&geometry.name);
            format!(
                "SELECT COUNT(*), MIN(MbrMinX({column})), MIN(MbrMinY({column})), \
                 MAX(MbrMaxX({column})), MAX(MbrMaxY({column}))"
            )
        }
        None => "SELECT COUNT(*)".to_string(),
    };
    sql.push_str(&format!(" FROM ({effective_query}\n) AS {VIEW}"));
    if let Some(condition) = subset_condition(subset) {
        sql.push_str(" WHERE ");
        sql.push_str(&condition);
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::schema::{GeometryColumn, UidColumn};
    use crate::vector::{Fields, GeometryType};

    fn schema(uid: bool) -> ResultSchema {
        ResultSchema {
            fields: Fields::default(),
            attribute_columns: Vec::new(),
            geometry: Some(GeometryColumn {
                name: "geom".to_string(),
                index: 1,
                geometry_type: GeometryType::Point,
                srid: 4326,
            }),
            uid: uid.then(|| UidColumn {
                name: "id".to_string(),
                index: 0,
            }),
        }
    }

    fn rect() -> Rect<f64> {
        Rect::new((0.0, 1.0), (2.0, 3.0))
    }

    #[test]
    fn test_rect_in_query_mode() {
        let def = VirtualLayerDefinition::new().with_query("SELECT * FROM t");
        let request = FeatureRequest::new().with_filter_rect(rect());
        let query = build_row_query(&def, &schema(false), "SELECT * FROM t", Some("id > 2"), &request);
        assert_eq!(
            query.sql,
            "SELECT * FROM (SELECT * FROM t\n) AS _view WHERE (id > 2) AND BboxIntersects(_view.\"geom\", ?, ?, ?, ?, 4326)"
        );
        assert_eq!(query.params.len(), 4);
        assert_eq!(query.params[1], Value::Real(1.0));

        let request = request.with_flags(RequestFlags::EXACT_INTERSECT);
        let query = build_row_query(&def, &schema(false), "SELECT * FROM t", None, &request);
        assert!(query.sql.ends_with("WHERE Intersects(_view.\"geom\", BuildMbr(?, ?, ?, ?, 4326))"));
    }

    #[test]
    fn test_rect_in_pass_through_mode() {
        let def = VirtualLayerDefinition::new().add_reference("pts", Some("p"));
        let request = FeatureRequest::new().with_filter_rect(rect());
        let query = build_row_query(&def, &schema(false), "SELECT * FROM \"p\"", None, &request);
        assert!(query
            .sql
            .starts_with("SELECT * FROM (SELECT * FROM \"p\" WHERE \"_search_frame_\" = BuildMbr(?, ?, ?, ?)\n) AS _view"));
        assert_eq!(query.params.len(), 8);
    }

    #[test]
    fn test_default_spatial_filter() {
        let def = VirtualLayerDefinition::new()
            .with_query("SELECT * FROM t")
            .with_spatial_filter(rect());
        let query = build_row_query(&def, &schema(true), "SELECT * FROM t", None, &FeatureRequest::new());
        assert_eq!(query.params.len(), 4);

        let query = build_row_query(&def, &schema(true), "SELECT * FROM t", None, &FeatureRequest::new().with_fid(3));
        assert!(query.sql.ends_with("WHERE _view.\"id\" = ?"));
        assert_eq!(query.params, [Value::Integer(3)]);
    }

    #[test]
    fn test_fids() {
        let def = VirtualLayerDefinition::new().with_query("SELECT * FROM t");
        let request = FeatureRequest::new().with_fids(vec![1, 5]);
        let query = build_row_query(&def, &schema(true), "SELECT * FROM t", None, &request);
        assert!(query.sql.ends_with("WHERE _view.\"id\" IN (?, ?)"));

        let request = FeatureRequest::new().with_fids(Vec::new());
        let query = build_row_query(&def, &schema(true), "SELECT * FROM t", None, &request);
        assert!(query.sql.ends_with("WHERE 0"));

        // left to the mapper
        let query = build_row_query(&def, &schema(false), "SELECT * FROM t", None, &request);
        assert_eq!(query.sql, "SELECT * FROM (SELECT * FROM t\n) AS _view");
    }

    #[test]
    fn test_statistics_query() {
        let sql = statistics_query(&schema(false), "SELECT * FROM t", Some(" "));
        assert_eq!(
            sql,
            "SELECT COUNT(*), MIN(MbrMinX(_view.\"geom\")), MIN(MbrMinY(_view.\"geom\")), \
             MAX(MbrMaxX(_view.\"geom\")), MAX(MbrMaxY(_view.\"geom\")) FROM (SELECT * FROM t\n) AS _view"
        );
    }
}
