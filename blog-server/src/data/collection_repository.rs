use crate::domain::error::DomainError;
use crate::domain::query::{Filter, MAX_PAGE_SIZE, Order, Selection};
use crate::domain::schema::{Collection, Column, ColumnType, TableSchema};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Row access for the REST collections. Rows go in and come out as JSON
/// objects; implementations apply the visibility rule on reads and the
/// owner scope on writes.
#[async_trait]
pub trait CollectionRepository: Send + Sync {
    async fn select(
        &self,
        collection: Collection,
        selection: &Selection,
        viewer: Option<Uuid>,
    ) -> Result<Vec<Value>, DomainError>;
    async fn count(
        &self,
        collection: Collection,
        filters: &[Filter],
        viewer: Option<Uuid>,
    ) -> Result<i64, DomainError>;
    async fn insert(
        &self,
        collection: Collection,
        rows: Vec<Map<String, Value>>,
    ) -> Result<Vec<Value>, DomainError>;
    async fn update(
        &self,
        collection: Collection,
        patch: Map<String, Value>,
        filters: &[Filter],
        owner: Uuid,
    ) -> Result<Vec<Value>, DomainError>;
    async fn delete(
        &self,
        collection: Collection,
        filters: &[Filter],
        owner: Uuid,
    ) -> Result<Vec<Value>, DomainError>;
}

#[derive(Clone)]
pub struct PostgresCollectionRepository {
    pool: PgPool,
}

impl PostgresCollectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CollectionRepository for PostgresCollectionRepository {
    async fn select(
        &self,
        collection: Collection,
        selection: &Selection,
        viewer: Option<Uuid>,
    ) -> Result<Vec<Value>, DomainError> {
        let mut builder = build_select(collection, selection, viewer)?;
        let rows = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to select from {}: {}", collection, e);
                DomainError::from(e)
            })?;
        debug!(%collection, rows = rows.len(), "rows selected");
        Ok(rows)
    }

    async fn count(
        &self,
        collection: Collection,
        filters: &[Filter],
        viewer: Option<Uuid>,
    ) -> Result<i64, DomainError> {
        let mut builder = build_count(collection, filters, viewer)?;
        builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(DomainError::from)
    }

    async fn insert(
        &self,
        collection: Collection,
        rows: Vec<Map<String, Value>>,
    ) -> Result<Vec<Value>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(DomainError::from)?;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut builder = build_insert(collection, row)?;
            let value = builder
                .build_query_scalar::<Value>()
                .fetch_one(&mut *tx)
                .await
                .map_err(DomainError::from)?;
            inserted.push(value);
        }
        tx.commit().await.map_err(DomainError::from)?;
        info!(%collection, rows = inserted.len(), "rows inserted");
        Ok(inserted)
    }

    async fn update(
        &self,
        collection: Collection,
        patch: Map<String, Value>,
        filters: &[Filter],
        owner: Uuid,
    ) -> Result<Vec<Value>, DomainError> {
        let mut builder = build_update(collection, &patch, filters, owner)?;
        let rows = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(DomainError::from)?;
        info!(%collection, rows = rows.len(), "rows updated");
        Ok(rows)
    }

    async fn delete(
        &self,
        collection: Collection,
        filters: &[Filter],
        owner: Uuid,
    ) -> Result<Vec<Value>, DomainError> {
        let mut builder = build_delete(collection, filters, owner)?;
        let rows = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(DomainError::from)?;
        info!(%collection, rows = rows.len(), "rows deleted");
        Ok(rows)
    }
}

type Builder = QueryBuilder<'static, Postgres>;

/// Text form of a scalar JSON value, cast to the column type in SQL.
fn scalar_text(column: &Column, value: &Value) -> Result<Option<String>, DomainError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(DomainError::BadRequest(format!(
            "column {} expects a scalar value",
            column.name
        ))),
    }
}

fn push_value(builder: &mut Builder, column: &Column, value: &Value) -> Result<(), DomainError> {
    if column.ty == ColumnType::TextArray {
        let items = match value {
            Value::Null => None,
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s.clone()),
                        _ => Err(DomainError::BadRequest(format!(
                            "column {} expects an array of strings",
                            column.name
                        ))),
                    })
                    .collect::<Result<Vec<String>, _>>()?,
            ),
            _ => {
                return Err(DomainError::BadRequest(format!(
                    "column {} expects an array of strings",
                    column.name
                )));
            }
        };
        builder.push_bind(items).push("::text[]");
        return Ok(());
    }
    builder
        .push_bind(scalar_text(column, value)?)
        .push("::")
        .push(column.ty.sql());
    Ok(())
}

fn push_filter(builder: &mut Builder, schema: &TableSchema, filter: &Filter) -> Result<(), DomainError> {
    match filter {
        Filter::Eq { column, value } => {
            let column = schema.column(column)?;
            if value.is_null() {
                builder.push(column.name).push(" IS NULL");
            } else {
                builder.push(column.name).push(" = ");
                push_value(builder, &column, value)?;
            }
        }
        Filter::Neq { column, value } => {
            let column = schema.column(column)?;
            if value.is_null() {
                builder.push(column.name).push(" IS NOT NULL");
            } else {
                builder.push(column.name).push(" IS DISTINCT FROM ");
                push_value(builder, &column, value)?;
            }
        }
        Filter::In { column, values } => {
            let column = schema.column(column)?;
            if column.ty == ColumnType::TextArray {
                return Err(DomainError::BadRequest(format!(
                    "column {} does not support in",
                    column.name
                )));
            }
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                if let Some(text) = scalar_text(&column, value)? {
                    items.push(text);
                }
            }
            if items.is_empty() {
                builder.push("FALSE");
            } else {
                builder
                    .push(column.name)
                    .push(" = ANY(")
                    .push_bind(items)
                    .push("::")
                    .push(column.ty.sql())
                    .push("[])");
            }
        }
        Filter::IsNull { column } => {
            builder.push(schema.column(column)?.name).push(" IS NULL");
        }
        Filter::NotNull { column } => {
            builder.push(schema.column(column)?.name).push(" IS NOT NULL");
        }
        Filter::Ilike { column, pattern } => {
            let column = schema.column(column)?;
            if column.ty != ColumnType::Text {
                return Err(DomainError::BadRequest(format!(
                    "column {} does not support ilike",
                    column.name
                )));
            }
            builder
                .push(column.name)
                .push(" ILIKE ")
                .push_bind(pattern.clone());
        }
        Filter::Or { filters } => {
            if filters.is_empty() {
                builder.push("FALSE");
                return Ok(());
            }
            builder.push("(");
            for (i, inner) in filters.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                push_filter(builder, schema, inner)?;
            }
            builder.push(")");
        }
    }
    Ok(())
}

fn push_filters(builder: &mut Builder, schema: &TableSchema, filters: &[Filter]) -> Result<(), DomainError> {
    for filter in filters {
        builder.push(" AND ");
        push_filter(builder, schema, filter)?;
    }
    Ok(())
}

/// Private posts are readable by their author only.
fn push_visibility(builder: &mut Builder, collection: Collection, viewer: Option<Uuid>) {
    if collection != Collection::Posts {
        return;
    }
    match viewer {
        Some(viewer) => {
            builder
                .push(" AND (is_public OR author_id = ")
                .push_bind(viewer)
                .push(")");
        }
        None => {
            builder.push(" AND is_public");
        }
    }
}

fn push_order(builder: &mut Builder, schema: &TableSchema, order: &[Order]) -> Result<(), DomainError> {
    for (i, o) in order.iter().enumerate() {
        builder.push(if i == 0 { " ORDER BY " } else { ", " });
        builder
            .push(schema.column(&o.column)?.name)
            .push(if o.descending { " DESC" } else { " ASC" })
            .push(" NULLS LAST");
    }
    Ok(())
}

pub(crate) fn build_select(
    collection: Collection,
    selection: &Selection,
    viewer: Option<Uuid>,
) -> Result<Builder, DomainError> {
    let schema = collection.schema();
    let columns = match &selection.columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| schema.column(c).map(|c| c.name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", "),
        _ => "*".to_string(),
    };

    let mut builder = QueryBuilder::new("SELECT to_jsonb(t) FROM (SELECT ");
    builder
        .push(columns)
        .push(" FROM ")
        .push(schema.table)
        .push(" WHERE TRUE");
    push_visibility(&mut builder, collection, viewer);
    push_filters(&mut builder, schema, &selection.filters)?;
    push_order(&mut builder, schema, &selection.order)?;
    if let Some(range) = selection.range {
        builder
            .push(" LIMIT ")
            .push_bind(range.limit.min(MAX_PAGE_SIZE) as i64)
            .push(" OFFSET ")
            .push_bind(range.offset as i64);
    }
    builder.push(") AS t");
    Ok(builder)
}

pub(crate) fn build_count(
    collection: Collection,
    filters: &[Filter],
    viewer: Option<Uuid>,
) -> Result<Builder, DomainError> {
    let schema = collection.schema();
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM ");
    builder.push(schema.table).push(" WHERE TRUE");
    push_visibility(&mut builder, collection, viewer);
    push_filters(&mut builder, schema, filters)?;
    Ok(builder)
}

pub(crate) fn build_insert(
    collection: Collection,
    row: &Map<String, Value>,
) -> Result<Builder, DomainError> {
    let schema = collection.schema();
    if row.is_empty() {
        return Err(DomainError::BadRequest("empty record".into()));
    }
    let columns = row
        .keys()
        .map(|k| schema.column(k))
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder.push(schema.table).push(" (");
    builder.push(columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", "));
    builder.push(") VALUES (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        push_value(&mut builder, column, &row[column.name])?;
    }
    builder
        .push(") RETURNING to_jsonb(")
        .push(schema.table)
        .push(".*)");
    Ok(builder)
}

pub(crate) fn build_update(
    collection: Collection,
    patch: &Map<String, Value>,
    filters: &[Filter],
    owner: Uuid,
) -> Result<Builder, DomainError> {
    let schema = collection.schema();
    if patch.is_empty() {
        return Err(DomainError::BadRequest("empty patch".into()));
    }
    let mut builder = QueryBuilder::new("UPDATE ");
    builder.push(schema.table).push(" SET ");
    for (i, (key, value)) in patch.iter().enumerate() {
        let column = schema.column(key)?;
        if i > 0 {
            builder.push(", ");
        }
        builder.push(column.name).push(" = ");
        push_value(&mut builder, &column, value)?;
    }
    if schema.touches_updated_at {
        builder.push(", updated_at = clock_timestamp()");
    }
    builder
        .push(" WHERE ")
        .push(schema.owner)
        .push(" = ")
        .push_bind(owner);
    push_filters(&mut builder, schema, filters)?;
    builder
        .push(" RETURNING to_jsonb(")
        .push(schema.table)
        .push(".*)");
    Ok(builder)
}

pub(crate) fn build_delete(
    collection: Collection,
    filters: &[Filter],
    owner: Uuid,
) -> Result<Builder, DomainError> {
    let schema = collection.schema();
    let mut builder = QueryBuilder::new("DELETE FROM ");
    builder
        .push(schema.table)
        .push(" WHERE ")
        .push(schema.owner)
        .push(" = ")
        .push_bind(owner);
    push_filters(&mut builder, schema, filters)?;
    builder
        .push(" RETURNING to_jsonb(")
        .push(schema.table)
        .push(".*)");
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::query::Range;
    use serde_json::json;

    fn eq(column: &str, value: Value) -> Filter {
        Filter::Eq {
            column: column.into(),
            value,
        }
    }

    fn ilike(column: &str, pattern: &str) -> Filter {
        Filter::Ilike {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    #[test]
    fn feed_select_for_anonymous_reader() {
        let selection = Selection {
            filters: vec![eq("is_public", json!(true))],
            order: vec![
                Order {
                    column: "like_count".into(),
                    descending: true,
                },
                Order {
                    column: "created_at".into(),
                    descending: true,
                },
            ],
            range: Some(Range {
                offset: 12,
                limit: 12,
            }),
            ..Selection::default()
        };
        let builder = build_select(Collection::Posts, &selection, None).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(t) FROM (SELECT * FROM posts WHERE TRUE AND is_public \
             AND is_public = $1::boolean \
             ORDER BY like_count DESC NULLS LAST, created_at DESC NULLS LAST \
             LIMIT $2 OFFSET $3) AS t"
        );
    }

    #[test]
    fn signed_in_reader_also_sees_own_private_posts() {
        let selection = Selection {
            columns: Some(vec!["id".into(), "like_count".into()]),
            ..Selection::default()
        };
        let builder = build_select(Collection::Posts, &selection, Some(Uuid::nil())).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(t) FROM (SELECT id, like_count FROM posts \
             WHERE TRUE AND (is_public OR author_id = $1)) AS t"
        );
    }

    #[test]
    fn other_collections_have_no_visibility_clause() {
        let builder = build_count(
            Collection::Comments,
            &[eq("post_id", json!(Uuid::nil()))],
            None,
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM comments WHERE TRUE AND post_id = $1::uuid"
        );
    }

    #[test]
    fn search_filter_renders_or_group() {
        let selection = Selection {
            filters: vec![Filter::Or {
                filters: vec![ilike("title", "%rust%"), ilike("content", "%rust%")],
            }],
            ..Selection::default()
        };
        let builder = build_select(Collection::Posts, &selection, None).unwrap();
        assert!(
            builder
                .sql()
                .contains("AND (title ILIKE $1 OR content ILIKE $2)")
        );
    }

    #[test]
    fn in_and_null_filters() {
        let filters = vec![
            Filter::In {
                column: "id".into(),
                values: vec![json!(Uuid::nil()), json!(Uuid::from_u128(1))],
            },
            eq("parent_id", Value::Null),
            Filter::Neq {
                column: "content".into(),
                value: json!("x"),
            },
            Filter::In {
                column: "author_id".into(),
                values: vec![],
            },
        ];
        let builder = build_count(Collection::Comments, &filters, None).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM comments WHERE TRUE AND id = ANY($1::uuid[]) \
             AND parent_id IS NULL AND content IS DISTINCT FROM $2::text AND FALSE"
        );
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let selection = Selection {
            filters: vec![eq("password_hash", json!("x"))],
            ..Selection::default()
        };
        assert!(matches!(
            build_select(Collection::Profiles, &selection, None),
            Err(DomainError::BadRequest(_))
        ));
        let selection = Selection {
            order: vec![Order {
                column: "1; DROP TABLE posts".into(),
                descending: false,
            }],
            ..Selection::default()
        };
        assert!(build_select(Collection::Posts, &selection, None).is_err());
    }

    #[test]
    fn ilike_only_on_text_columns() {
        assert!(build_count(Collection::Posts, &[ilike("like_count", "%1%")], None).is_err());
    }

    #[test]
    fn insert_casts_each_value() {
        let row = json!({ "author_id": Uuid::nil(), "title": "t", "tags": ["a", "b"], "is_public": false });
        let Value::Object(row) = row else { unreachable!() };
        let builder = build_insert(Collection::Posts, &row).unwrap();
        let sql = builder.sql();
        assert!(sql.starts_with("INSERT INTO posts ("));
        assert!(sql.contains("$1::") && sql.contains("::text[]") && sql.contains("::boolean"));
        assert!(sql.ends_with("RETURNING to_jsonb(posts.*)"));
    }

    #[test]
    fn tags_must_be_strings() {
        let Value::Object(row) = json!({ "tags": [1, 2] }) else { unreachable!() };
        assert!(matches!(
            build_insert(Collection::Posts, &row),
            Err(DomainError::BadRequest(_))
        ));
    }

    #[test]
    fn updates_and_deletes_are_owner_scoped() {
        let Value::Object(patch) = json!({ "content": "edited" }) else { unreachable!() };
        let builder = build_update(
            Collection::Comments,
            &patch,
            &[eq("id", json!(Uuid::nil()))],
            Uuid::nil(),
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "UPDATE comments SET content = $1::text, updated_at = clock_timestamp() \
             WHERE author_id = $2 AND id = $3::uuid RETURNING to_jsonb(comments.*)"
        );

        let builder = build_delete(
            Collection::Likes,
            &[eq("post_id", json!(Uuid::nil()))],
            Uuid::nil(),
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "DELETE FROM likes WHERE user_id = $1 AND post_id = $2::uuid \
             RETURNING to_jsonb(likes.*)"
        );
    }

    #[test]
    fn profile_updates_do_not_touch_updated_at() {
        let Value::Object(patch) = json!({ "bio": "hi" }) else { unreachable!() };
        let builder = build_update(Collection::Profiles, &patch, &[], Uuid::nil()).unwrap();
        assert!(!builder.sql().contains("updated_at"));
    }
}
