//! In-process backend with the same observable rules as `blog-server`:
//! owner-scoped mutations, public/private post visibility, unique join
//! rows, one-level replies and counter side effects.

use crate::error::BlogClientError;
use crate::model::{AuthUser, ProfileSeed, Session};
use crate::query::{Collection, Filter, Query};
use crate::{AuthApi, DataService, StorageApi};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Default)]
struct State {
    tables: HashMap<Collection, Vec<Map<String, Value>>>,
    users: Vec<(AuthUser, String)>,
    objects: HashMap<String, Vec<u8>>,
    session: Option<Session>,
    clock: Option<DateTime<Utc>>,
    pending_failure: Option<BlogClientError>,
    select_calls: usize,
}

impl State {
    /// Strictly increasing timestamps so ordering by time is deterministic.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn caller(&self) -> Result<Uuid, BlogClientError> {
        self.session
            .as_ref()
            .map(|s| s.user.id)
            .ok_or(BlogClientError::Unauthorized)
    }

    fn take_failure(&mut self) -> Result<(), BlogClientError> {
        match self.pending_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn table(&mut self, collection: Collection) -> &mut Vec<Map<String, Value>> {
        self.tables.entry(collection).or_default()
    }

    fn rows(&self, collection: Collection) -> &[Map<String, Value>] {
        self.tables
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn find(&self, collection: Collection, id: &Value) -> Option<&Map<String, Value>> {
        self.rows(collection).iter().find(|r| r.get("id") == Some(id))
    }

    fn bump(&mut self, collection: Collection, id: &Value, column: &str, delta: i64) {
        if let Some(row) = self
            .table(collection)
            .iter_mut()
            .find(|r| r.get("id") == Some(id))
        {
            let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
            row.insert(column.to_string(), json!((current + delta).max(0)));
        }
    }

    fn visible(&self, collection: Collection, row: &Map<String, Value>) -> bool {
        if collection != Collection::Posts {
            return true;
        }
        if row.get("is_public") == Some(&Value::Bool(true)) {
            return true;
        }
        match &self.session {
            Some(session) => row.get("author_id") == Some(&json!(session.user.id)),
            None => false,
        }
    }
}

fn owner_column(collection: Collection) -> &'static str {
    match collection {
        Collection::Posts | Collection::Comments => "author_id",
        Collection::Profiles => "id",
        Collection::Likes | Collection::CommentLikes => "user_id",
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next mutating call fails with `err` instead of running.
    pub async fn fail_next(&self, err: BlogClientError) {
        self.state.lock().await.pending_failure = Some(err);
    }

    pub async fn select_calls(&self) -> usize {
        self.state.lock().await.select_calls
    }

    pub async fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .objects
            .get(&format!("{bucket}/{path}"))
            .cloned()
    }

    fn new_session(user: &AuthUser) -> Session {
        Session {
            access_token: format!("memory-{}", Uuid::new_v4()),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + Duration::seconds(TOKEN_TTL_SECS),
            user: user.clone(),
        }
    }
}

fn as_object(value: Value) -> Result<Map<String, Value>, BlogClientError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(BlogClientError::InvalidRequest(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

fn fill_defaults(
    collection: Collection,
    row: &mut Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<(), BlogClientError> {
    let now = json!(now);
    let mut default = |key: &str, value: Value| {
        if row.get(key).is_none_or(Value::is_null) {
            row.insert(key.to_string(), value);
        }
    };
    match collection {
        Collection::Posts => {
            default("id", json!(Uuid::new_v4()));
            default("tags", json!([]));
            default("is_public", json!(true));
            default("view_count", json!(0));
            default("like_count", json!(0));
            default("comment_count", json!(0));
            default("created_at", now.clone());
            default("updated_at", now);
        }
        Collection::Comments => {
            default("id", json!(Uuid::new_v4()));
            default("like_count", json!(0));
            default("created_at", now.clone());
            default("updated_at", now);
        }
        Collection::Profiles => {
            default("show_email", json!(false));
            default("created_at", now);
        }
        Collection::Likes | Collection::CommentLikes => {
            default("created_at", now);
        }
    }
    Ok(())
}

fn conflict(constraint: &str) -> BlogClientError {
    BlogClientError::Conflict(format!(
        "duplicate key value violates unique constraint \"{constraint}\""
    ))
}

fn check_insert(
    state: &State,
    collection: Collection,
    row: &Map<String, Value>,
) -> Result<(), BlogClientError> {
    let same = |a: &Map<String, Value>, keys: &[&str]| keys.iter().all(|k| a.get(*k) == row.get(*k));
    match collection {
        Collection::Posts => {
            let slug = row.get("slug").filter(|v| v.is_string());
            if slug.is_some()
                && state
                    .rows(Collection::Posts)
                    .iter()
                    .any(|p| p.get("slug") == slug)
            {
                return Err(conflict("posts_slug_key"));
            }
            let tags = row.get("tags").and_then(Value::as_array).map_or(0, Vec::len);
            if tags > 5 {
                return Err(BlogClientError::InvalidRequest(
                    "a post can carry at most 5 tags".into(),
                ));
            }
        }
        Collection::Comments => {
            let post_id = row.get("post_id").cloned().unwrap_or(Value::Null);
            if state.find(Collection::Posts, &post_id).is_none() {
                return Err(BlogClientError::InvalidRequest("post does not exist".into()));
            }
            if let Some(parent_id) = row.get("parent_id").filter(|v| !v.is_null()) {
                let parent = state
                    .find(Collection::Comments, parent_id)
                    .ok_or_else(|| BlogClientError::InvalidRequest("parent comment does not exist".into()))?;
                let top_level = parent.get("parent_id").is_none_or(Value::is_null);
                if !top_level || parent.get("post_id") != Some(&post_id) {
                    return Err(BlogClientError::InvalidRequest(
                        "replies must target a top-level comment of the same post".into(),
                    ));
                }
            }
        }
        Collection::Profiles => {
            if state.rows(collection).iter().any(|p| same(p, &["id"])) {
                return Err(conflict("profiles_pkey"));
            }
        }
        Collection::Likes => {
            let post_id = row.get("post_id").cloned().unwrap_or(Value::Null);
            if state.find(Collection::Posts, &post_id).is_none() {
                return Err(BlogClientError::InvalidRequest("post does not exist".into()));
            }
            if state
                .rows(collection)
                .iter()
                .any(|l| same(l, &["user_id", "post_id"]))
            {
                return Err(conflict("likes_pkey"));
            }
        }
        Collection::CommentLikes => {
            let comment_id = row.get("comment_id").cloned().unwrap_or(Value::Null);
            if state.find(Collection::Comments, &comment_id).is_none() {
                return Err(BlogClientError::InvalidRequest(
                    "comment does not exist".into(),
                ));
            }
            if state
                .rows(collection)
                .iter()
                .any(|l| same(l, &["user_id", "comment_id"]))
            {
                return Err(conflict("comment_likes_pkey"));
            }
        }
    }
    Ok(())
}

/// Counter bookkeeping the database does with triggers.
fn apply_side_effects(state: &mut State, collection: Collection, row: &Map<String, Value>, delta: i64) {
    let field = |key: &str| row.get(key).cloned().unwrap_or(Value::Null);
    match collection {
        Collection::Likes => state.bump(Collection::Posts, &field("post_id"), "like_count", delta),
        Collection::CommentLikes => {
            state.bump(Collection::Comments, &field("comment_id"), "like_count", delta)
        }
        Collection::Comments => {
            state.bump(Collection::Posts, &field("post_id"), "comment_count", delta)
        }
        Collection::Posts | Collection::Profiles => {}
    }
}

pub(crate) fn matches(row: &Map<String, Value>, filter: &Filter) -> bool {
    let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
    match filter {
        Filter::Eq { column, value } => get(column) == value,
        Filter::Neq { column, value } => get(column) != value,
        Filter::In { column, values } => values.contains(get(column)),
        Filter::IsNull { column } => get(column).is_null(),
        Filter::NotNull { column } => !get(column).is_null(),
        Filter::Ilike { column, pattern } => match get(column) {
            Value::String(text) => like_match(&text.to_lowercase(), &pattern.to_lowercase()),
            _ => false,
        },
        Filter::Or { filters } => filters.iter().any(|f| matches(row, f)),
    }
}

/// `LIKE` matching with `%`, `_` and backslash escapes.
pub(crate) fn like_match(text: &str, pattern: &str) -> bool {
    enum Token {
        Any,
        One,
        Lit(char),
    }
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        tokens.push(match ch {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            c => Token::Lit(c),
        });
    }
    let text: Vec<char> = text.chars().collect();
    // reachable[j]: pattern prefix consumed so far matches text[..j]
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            Token::One => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j];
                }
            }
            Token::Lit(c) => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j] && text[j] == *c;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DataService for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BlogClientError> {
        let mut state = self.state.lock().await;
        state.select_calls += 1;
        let mut rows: Vec<Map<String, Value>> = state
            .rows(query.collection)
            .iter()
            .filter(|row| state.visible(query.collection, row))
            .filter(|row| query.filters.iter().all(|f| matches(row, f)))
            .cloned()
            .collect();

        // Nulls sort last in both directions, like Postgres `NULLS LAST`.
        rows.sort_by(|a, b| {
            for order in &query.order {
                let (x, y) = (
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                let ordering = match (x.is_null(), y.is_null()) {
                    (false, false) if order.descending => compare_values(y, x),
                    _ => compare_values(x, y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        let rows = match query.range {
            Some(range) => rows
                .into_iter()
                .skip(range.offset)
                .take(range.limit)
                .collect(),
            None => rows,
        };

        Ok(rows
            .into_iter()
            .map(|row| match &query.columns {
                Some(columns) => Value::Object(
                    columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                        .collect(),
                ),
                None => Value::Object(row),
            })
            .collect())
    }

    async fn insert(
        &self,
        collection: Collection,
        records: Vec<Value>,
    ) -> Result<Vec<Value>, BlogClientError> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let caller = state.caller()?;
        let owner = owner_column(collection);

        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            let mut row = as_object(record)?;
            if row.get(owner) != Some(&json!(caller)) {
                return Err(BlogClientError::Forbidden);
            }
            let now = state.tick();
            fill_defaults(collection, &mut row, now)?;
            check_insert(&state, collection, &row)?;
            prepared.push(row);
        }

        let mut inserted = Vec::with_capacity(prepared.len());
        for row in prepared {
            state.table(collection).push(row.clone());
            apply_side_effects(&mut state, collection, &row, 1);
            inserted.push(Value::Object(row));
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        collection: Collection,
        patch: Value,
        filters: Vec<Filter>,
    ) -> Result<Vec<Value>, BlogClientError> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let caller = json!(state.caller()?);
        if filters.is_empty() {
            return Err(BlogClientError::InvalidRequest(
                "updates require at least one filter".into(),
            ));
        }
        let patch = as_object(patch)?;
        if collection == Collection::Comments && patch.get("deleted_at") == Some(&Value::Null) {
            return Err(BlogClientError::InvalidRequest(
                "column comments.deleted_at cannot be cleared".into(),
            ));
        }
        let owner = owner_column(collection);
        let slug = patch.get("slug").filter(|v| v.is_string());
        if collection == Collection::Posts
            && slug.is_some()
            && state
                .rows(Collection::Posts)
                .iter()
                .any(|p| p.get("slug") == slug)
        {
            return Err(conflict("posts_slug_key"));
        }

        let now = json!(state.tick());
        let mut updated = Vec::new();
        for row in state.table(collection).iter_mut() {
            if row.get(owner) != Some(&caller) || !filters.iter().all(|f| matches(row, f)) {
                continue;
            }
            for (key, value) in &patch {
                row.insert(key.clone(), value.clone());
            }
            if row.contains_key("updated_at") {
                row.insert("updated_at".into(), now.clone());
            }
            updated.push(Value::Object(row.clone()));
        }
        Ok(updated)
    }

    async fn delete(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> Result<Vec<Value>, BlogClientError> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let caller = json!(state.caller()?);
        if filters.is_empty() {
            return Err(BlogClientError::InvalidRequest(
                "deletes require at least one filter".into(),
            ));
        }
        if matches!(collection, Collection::Comments | Collection::Profiles) {
            return Err(BlogClientError::Forbidden);
        }
        let owner = owner_column(collection);

        let table = state.table(collection);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(table)
            .into_iter()
            .partition(|row| row.get(owner) == Some(&caller) && filters.iter().all(|f| matches(row, f)));
        *table = kept;

        for row in &removed {
            apply_side_effects(&mut state, collection, row, -1);
            if collection == Collection::Posts {
                let post_id = row.get("id").cloned().unwrap_or(Value::Null);
                let comment_ids: Vec<Value> = state
                    .rows(Collection::Comments)
                    .iter()
                    .filter(|c| c.get("post_id") == Some(&post_id))
                    .filter_map(|c| c.get("id").cloned())
                    .collect();
                state
                    .table(Collection::CommentLikes)
                    .retain(|r| r.get("comment_id").is_none_or(|id| !comment_ids.contains(id)));
                for child in [Collection::Comments, Collection::Likes] {
                    state
                        .table(child)
                        .retain(|r| r.get("post_id") != Some(&post_id));
                }
            }
        }
        Ok(removed.into_iter().map(Value::Object).collect())
    }

    async fn count(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> Result<u64, BlogClientError> {
        let state = self.state.lock().await;
        Ok(state
            .rows(collection)
            .iter()
            .filter(|row| state.visible(collection, row))
            .filter(|row| filters.iter().all(|f| matches(row, f)))
            .count() as u64)
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: ProfileSeed,
    ) -> Result<Session, BlogClientError> {
        let mut state = self.state.lock().await;
        let email = email.trim().to_lowercase();
        if state.users.iter().any(|(u, _)| u.email == email) {
            return Err(BlogClientError::Conflict("user already registered".into()));
        }
        let created_at = state.tick();
        let user = AuthUser {
            id: Uuid::new_v4(),
            email,
            created_at,
        };
        state.users.push((user.clone(), password.to_string()));
        let profile = json!({
            "id": user.id,
            "nickname": seed.nickname,
            "bio": null,
            "avatar_url": null,
            "show_email": false,
            "created_at": created_at,
        });
        state.table(Collection::Profiles).push(as_object(profile)?);

        let session = Self::new_session(&user);
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BlogClientError> {
        let mut state = self.state.lock().await;
        let email = email.trim().to_lowercase();
        let user = state
            .users
            .iter()
            .find(|(u, p)| u.email == email && p == password)
            .map(|(u, _)| u.clone())
            .ok_or(BlogClientError::Unauthorized)?;
        let session = Self::new_session(&user);
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BlogClientError> {
        self.state.lock().await.session = None;
        Ok(())
    }

    async fn get_session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    async fn refresh_session(&self) -> Result<Session, BlogClientError> {
        let mut state = self.state.lock().await;
        let user = state
            .session
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or(BlogClientError::Unauthorized)?;
        let session = Self::new_session(&user);
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn set_session(&self, session: Option<Session>) {
        self.state.lock().await.session = session;
    }
}

#[async_trait]
impl StorageApi for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, BlogClientError> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let caller = state.caller()?;
        if !path.starts_with(&format!("{caller}/")) {
            return Err(BlogClientError::Forbidden);
        }
        state.objects.insert(format!("{bucket}/{path}"), bytes);
        Ok(self.public_url(bucket, path))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}
