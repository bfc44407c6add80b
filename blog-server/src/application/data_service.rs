use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::data::collection_repository::CollectionRepository;
use crate::domain::error::DomainError;
use crate::domain::query::{Filter, Selection};
use crate::domain::schema::{Collection, TableSchema};

/// Write policy for the REST collections: who may touch which rows and
/// columns. Reads are filtered by the repository's visibility rule.
#[derive(Clone)]
pub struct DataService<R: CollectionRepository + 'static> {
    repo: Arc<R>,
}

impl<R> DataService<R>
where
    R: CollectionRepository + 'static,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn select(
        &self,
        collection: Collection,
        selection: &Selection,
        viewer: Option<Uuid>,
    ) -> Result<Vec<Value>, DomainError> {
        self.repo.select(collection, selection, viewer).await
    }

    pub async fn count(
        &self,
        collection: Collection,
        filters: &[Filter],
        viewer: Option<Uuid>,
    ) -> Result<i64, DomainError> {
        self.repo.count(collection, filters, viewer).await
    }

    #[instrument(skip(self, records))]
    pub async fn insert(
        &self,
        collection: Collection,
        records: Vec<Value>,
        caller: Option<Uuid>,
    ) -> Result<Vec<Value>, DomainError> {
        let caller = caller.ok_or(DomainError::Unauthorized)?;
        let schema = collection.schema();
        if schema.insertable.is_empty() {
            return Err(DomainError::Forbidden);
        }
        if records.is_empty() {
            return Err(DomainError::BadRequest("no records to insert".into()));
        }
        let rows = records
            .into_iter()
            .map(|record| owned_record(schema, record, caller))
            .collect::<Result<Vec<_>, _>>()?;
        self.repo.insert(collection, rows).await
    }

    #[instrument(skip(self, patch, filters))]
    pub async fn update(
        &self,
        collection: Collection,
        patch: Value,
        filters: Vec<Filter>,
        caller: Option<Uuid>,
    ) -> Result<Vec<Value>, DomainError> {
        let caller = caller.ok_or(DomainError::Unauthorized)?;
        let schema = collection.schema();
        if schema.updatable.is_empty() {
            return Err(DomainError::Forbidden);
        }
        let Value::Object(patch) = patch else {
            return Err(DomainError::BadRequest("patch must be an object".into()));
        };
        if let Some(key) = patch.keys().find(|k| !schema.can_update(k)) {
            return Err(DomainError::BadRequest(format!(
                "column {}.{key} is not writable",
                schema.table
            )));
        }
        if let Some(key) = patch
            .iter()
            .find(|(k, v)| v.is_null() && schema.is_set_once(k))
            .map(|(k, _)| k)
        {
            return Err(DomainError::BadRequest(format!(
                "column {}.{key} cannot be cleared",
                schema.table
            )));
        }
        require_filters(&filters)?;
        self.repo.update(collection, patch, &filters, caller).await
    }

    #[instrument(skip(self, filters))]
    pub async fn delete(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
        caller: Option<Uuid>,
    ) -> Result<Vec<Value>, DomainError> {
        let caller = caller.ok_or(DomainError::Unauthorized)?;
        if !collection.schema().deletable {
            return Err(DomainError::Forbidden);
        }
        require_filters(&filters)?;
        self.repo.delete(collection, &filters, caller).await
    }
}

fn require_filters(filters: &[Filter]) -> Result<(), DomainError> {
    if filters.is_empty() {
        return Err(DomainError::BadRequest(
            "refusing to change every row: add a filter".into(),
        ));
    }
    Ok(())
}

/// Checks the columns of one record and stamps the caller into the owner column.
fn owned_record(
    schema: &TableSchema,
    record: Value,
    caller: Uuid,
) -> Result<Map<String, Value>, DomainError> {
    let Value::Object(mut record) = record else {
        return Err(DomainError::BadRequest("record must be an object".into()));
    };
    if let Some(key) = record.keys().find(|k| !schema.can_insert(k)) {
        return Err(DomainError::BadRequest(format!(
            "column {}.{key} is not writable",
            schema.table
        )));
    }
    match record.get(schema.owner) {
        None | Some(Value::Null) => {
            record.insert(schema.owner.to_string(), Value::String(caller.to_string()));
        }
        Some(Value::String(owner)) if Uuid::parse_str(owner).ok() == Some(caller) => {}
        Some(other) => {
            warn!(table = schema.table, owner = %other, caller = %caller, "insert for another owner");
            return Err(DomainError::Forbidden);
        }
    }
    Ok(record)
}
