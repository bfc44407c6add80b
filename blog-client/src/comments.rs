//! Comments of a post: paging, the two-level thread and mutations.

use crate::error::BlogClientError;
use crate::model::{Comment, CommentView, NewComment};
use crate::pager::{PageSource, Pager};
use crate::profile::{author_for, load_authors};
use crate::query::{Collection, Filter, Order, Query};
use crate::session::SessionContext;
use crate::validation::{ValidationError, validate_comment};
use crate::{DataService, decode_one, decode_rows, encode};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub const COMMENT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadNode {
    pub comment: CommentView,
    /// Oldest first.
    pub replies: Vec<CommentView>,
}

/// Two-level view over a flat comment list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentThread {
    pub roots: Vec<ThreadNode>,
    /// Replies whose parent is not among the loaded top-level comments.
    pub orphans: usize,
}

impl CommentThread {
    /// Groups `comments` (newest first, as fetched) into top-level comments
    /// in input order, each with its replies in ascending creation time.
    pub fn build(comments: &[CommentView]) -> Self {
        let mut roots: Vec<ThreadNode> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();
        for view in comments.iter().filter(|v| !v.comment.is_reply()) {
            if index.contains_key(&view.comment.id) {
                continue;
            }
            index.insert(view.comment.id, roots.len());
            roots.push(ThreadNode {
                comment: view.clone(),
                replies: Vec::new(),
            });
        }

        let mut orphans = 0;
        let mut placed = HashSet::new();
        for view in comments.iter().filter(|v| v.comment.is_reply()) {
            if !placed.insert(view.comment.id) {
                continue;
            }
            match view.comment.parent_id.and_then(|p| index.get(&p)) {
                Some(&slot) => roots[slot].replies.push(view.clone()),
                None => orphans += 1,
            }
        }
        for node in &mut roots {
            // sort_by_key is stable, so equal timestamps keep input order
            node.replies.sort_by_key(|r| r.comment.created_at);
        }
        if orphans > 0 {
            debug!(orphans, "replies without a loaded parent were dropped");
        }
        Self { roots, orphans }
    }

    pub fn len(&self) -> usize {
        self.roots.iter().map(|n| 1 + n.replies.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

pub(crate) async fn attach_comment_authors<D: DataService + ?Sized>(
    data: &D,
    comments: Vec<Comment>,
) -> Result<Vec<CommentView>, BlogClientError> {
    let authors = load_authors(data, comments.iter().map(|c| c.author_id)).await?;
    Ok(comments
        .into_iter()
        .map(|comment| CommentView {
            author: author_for(&authors, comment.author_id),
            comment,
        })
        .collect())
}

/// Comments of one post, newest first.
pub struct CommentSource<D: DataService + ?Sized> {
    data: Arc<D>,
}

impl<D: DataService + ?Sized> CommentSource<D> {
    pub fn new(data: Arc<D>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl<D: DataService + ?Sized> PageSource for CommentSource<D> {
    type Key = Uuid;
    type Item = CommentView;

    async fn fetch_page(
        &self,
        post_id: &Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<CommentView>, BlogClientError> {
        let query = Query::new(Collection::Comments)
            .filter(Filter::eq("post_id", post_id))
            .order(Order::desc("created_at"))
            .page(page, page_size);
        let comments: Vec<Comment> = decode_rows(self.data.select(&query).await?)?;
        attach_comment_authors(self.data.as_ref(), comments).await
    }
}

pub struct CommentService<D: DataService + ?Sized> {
    data: Arc<D>,
    session: SessionContext,
}

impl<D: DataService + ?Sized> Clone for CommentService<D> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            session: self.session.clone(),
        }
    }
}

impl<D: DataService + ?Sized> CommentService<D> {
    pub fn new(data: Arc<D>, session: SessionContext) -> Self {
        Self { data, session }
    }

    pub fn pager(&self, post_id: Uuid) -> Pager<CommentSource<D>> {
        Pager::new(CommentSource::new(self.data.clone()), post_id, COMMENT_PAGE_SIZE)
    }

    pub async fn get_comment(&self, id: Uuid) -> Result<Comment, BlogClientError> {
        let query = Query::new(Collection::Comments).filter(Filter::eq("id", id));
        decode_one(self.data.select(&query).await?)
    }

    async fn insert(&self, record: NewComment) -> Result<CommentView, BlogClientError> {
        let rows = self
            .data
            .insert(Collection::Comments, vec![encode(&record)?])
            .await?;
        let comment: Comment = decode_one(rows)?;
        info!(comment_id = %comment.id, post_id = %comment.post_id, "comment added");
        attach_comment_authors(self.data.as_ref(), vec![comment])
            .await?
            .pop()
            .ok_or(BlogClientError::NotFound)
    }

    #[instrument(skip(self, body))]
    pub async fn add_comment(&self, post_id: Uuid, body: &str) -> Result<CommentView, BlogClientError> {
        let author_id = self.session.require_user()?;
        validate_comment(body)?;
        self.insert(NewComment {
            post_id,
            parent_id: None,
            author_id,
            content: body.trim().to_string(),
        })
        .await
    }

    /// Replies attach to live top-level comments of the same post only.
    #[instrument(skip(self, body))]
    pub async fn add_reply(
        &self,
        post_id: Uuid,
        parent_id: Uuid,
        body: &str,
    ) -> Result<CommentView, BlogClientError> {
        let author_id = self.session.require_user()?;
        validate_comment(body)?;
        let parent = self.get_comment(parent_id).await?;
        if parent.is_reply() || parent.post_id != post_id {
            return Err(ValidationError::NestedReply.into());
        }
        if parent.is_deleted() {
            return Err(ValidationError::CommentDeleted.into());
        }
        self.insert(NewComment {
            post_id,
            parent_id: Some(parent_id),
            author_id,
            content: body.trim().to_string(),
        })
        .await
    }

    #[instrument(skip(self, body))]
    pub async fn edit_comment(&self, id: Uuid, body: &str) -> Result<Comment, BlogClientError> {
        let user = self.session.require_user()?;
        validate_comment(body)?;
        let current = self.get_comment(id).await?;
        if current.author_id != user {
            return Err(BlogClientError::Forbidden);
        }
        if current.is_deleted() {
            return Err(ValidationError::CommentDeleted.into());
        }
        let rows = self
            .data
            .update(
                Collection::Comments,
                json!({ "content": body.trim() }),
                vec![Filter::eq("id", id), Filter::is_null("deleted_at")],
            )
            .await?;
        decode_one(rows)
    }

    /// Soft delete: the row stays so its replies keep their parent.
    #[instrument(skip(self))]
    pub async fn delete_comment(&self, id: Uuid) -> Result<Comment, BlogClientError> {
        let user = self.session.require_user()?;
        let current = self.get_comment(id).await?;
        if current.author_id != user {
            return Err(BlogClientError::Forbidden);
        }
        if current.is_deleted() {
            return Ok(current);
        }
        let rows = self
            .data
            .update(
                Collection::Comments,
                json!({ "deleted_at": Utc::now() }),
                vec![Filter::eq("id", id)],
            )
            .await?;
        info!(comment_id = %id, "comment deleted");
        decode_one(rows)
    }
}
