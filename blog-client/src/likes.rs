//! Optimistic like toggling for posts and comments.

use crate::error::BlogClientError;
use crate::query::{Collection, Filter, Query};
use crate::session::SessionContext;
use crate::DataService;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What a like button shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub target_id: Uuid,
    pub liked: bool,
    pub count: i64,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Post,
    Comment,
}

impl Target {
    fn collection(self) -> Collection {
        match self {
            Target::Post => Collection::Likes,
            Target::Comment => Collection::CommentLikes,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Target::Post => "post_id",
            Target::Comment => "comment_id",
        }
    }
}

pub struct LikeService<D: DataService + ?Sized> {
    data: Arc<D>,
    session: SessionContext,
}

impl<D: DataService + ?Sized> Clone for LikeService<D> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            session: self.session.clone(),
        }
    }
}

impl<D: DataService + ?Sized> LikeService<D> {
    pub fn new(data: Arc<D>, session: SessionContext) -> Self {
        Self { data, session }
    }

    /// Initial button state for a post showing `count` likes.
    pub async fn post_like_state(&self, post_id: Uuid, count: i64) -> Result<LikeState, BlogClientError> {
        self.state(Target::Post, post_id, count).await
    }

    pub async fn comment_like_state(
        &self,
        comment_id: Uuid,
        count: i64,
    ) -> Result<LikeState, BlogClientError> {
        self.state(Target::Comment, comment_id, count).await
    }

    pub async fn toggle_post_like(&self, state: &mut LikeState) -> Result<(), BlogClientError> {
        self.toggle(Target::Post, state).await
    }

    pub async fn toggle_comment_like(&self, state: &mut LikeState) -> Result<(), BlogClientError> {
        self.toggle(Target::Comment, state).await
    }

    async fn state(&self, target: Target, id: Uuid, count: i64) -> Result<LikeState, BlogClientError> {
        let liked = match self.session.user_id() {
            Some(user) => self.is_liked(target, user, id).await?,
            None => false,
        };
        Ok(LikeState {
            target_id: id,
            liked,
            count,
        })
    }

    async fn is_liked(&self, target: Target, user: Uuid, id: Uuid) -> Result<bool, BlogClientError> {
        let query = Query::new(target.collection())
            .columns(&["user_id"])
            .filter(Filter::eq("user_id", user))
            .filter(Filter::eq(target.column(), id));
        Ok(!self.data.select(&query).await?.is_empty())
    }

    /// Applies the change to `state` before the request completes and
    /// restores it if the request fails. A duplicate-like conflict means the
    /// like already exists, so the state settles on liked.
    #[instrument(skip(self, state), fields(target_id = %state.target_id))]
    async fn toggle(&self, target: Target, state: &mut LikeState) -> Result<(), BlogClientError> {
        let user = self.session.require_user()?;
        let prior = *state;
        let liked = self.is_liked(target, user, state.target_id).await?;
        let filters = vec![
            Filter::eq("user_id", user),
            Filter::eq(target.column(), state.target_id),
        ];

        let result = if liked {
            state.liked = false;
            state.count = (prior.count - 1).max(0);
            self.data
                .delete(target.collection(), filters)
                .await
                .map(|_| ())
        } else {
            state.liked = true;
            state.count = prior.count + 1;
            let mut record = Map::new();
            record.insert("user_id".into(), json!(user));
            record.insert(target.column().into(), json!(state.target_id));
            self.data
                .insert(target.collection(), vec![Value::Object(record)])
                .await
                .map(|_| ())
        };

        match result {
            Ok(()) => {
                info!(liked = state.liked, count = state.count, "like toggled");
                Ok(())
            }
            Err(err) if err.is_conflict() && !liked => {
                state.liked = true;
                state.count = if prior.liked { prior.count } else { prior.count + 1 };
                info!("like already recorded, reconciled");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "like toggle failed, rolling back");
                *state = prior;
                Err(err)
            }
        }
    }
}
