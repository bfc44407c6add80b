use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DELETED_COMMENT_PLACEHOLDER: &str = "This comment has been deleted.";
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Anything a pager can de-duplicate on.
pub trait Identified {
    fn id(&self) -> Uuid;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[display("Post {{ id: {}, title: {}, author_id: {} }}", id, title, author_id)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_public: bool,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a client may set when creating a post. Counters, ids and
/// timestamps are owned by the backend.
#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub slug: Option<String>,
    pub thumbnail_url: Option<String>,
    pub tags: Vec<String>,
    pub is_public: bool,
}

/// Partial update for a post; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl PostPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.thumbnail_url.is_none()
            && self.tags.is_none()
            && self.is_public.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub author_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub post_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub author_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub nickname: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub show_email: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_email: Option<bool>,
}

/// Data used to create the profile row at sign-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSeed {
    pub nickname: String,
}

/// Projection used by the profile stats aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStat {
    pub id: Uuid,
    #[serde(default)]
    pub like_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub id: Uuid,
    pub nickname: String,
    pub avatar_url: Option<String>,
}

impl AuthorSummary {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            id: profile.id,
            nickname: profile.nickname.clone(),
            avatar_url: profile.avatar_url.clone(),
        }
    }

    /// Stand-in used when the author's profile could not be loaded.
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            nickname: UNKNOWN_AUTHOR.to_string(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub author: AuthorSummary,
}

impl Identified for PostView {
    fn id(&self) -> Uuid {
        self.post.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: AuthorSummary,
}

impl CommentView {
    pub fn display_body(&self) -> &str {
        if self.comment.is_deleted() {
            DELETED_COMMENT_PLACEHOLDER
        } else {
            &self.comment.content
        }
    }

    /// Replies hang off live top-level comments only.
    pub fn can_reply(&self) -> bool {
        !self.comment.is_deleted() && !self.comment.is_reply()
    }
}

impl Identified for CommentView {
    fn id(&self) -> Uuid {
        self.comment.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(parent: Option<Uuid>, deleted: bool) -> Comment {
        Comment {
            id: Uuid::new_v4(),
            post_id: Uuid::new_v4(),
            parent_id: parent,
            author_id: Uuid::new_v4(),
            content: "hi".into(),
            like_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: deleted.then(Utc::now),
        }
    }

    #[test]
    fn deleted_comment_shows_placeholder_and_hides_reply() {
        let view = CommentView {
            author: AuthorSummary::unknown(Uuid::nil()),
            comment: comment(None, true),
        };
        assert_eq!(view.display_body(), DELETED_COMMENT_PLACEHOLDER);
        assert!(!view.can_reply());
    }

    #[test]
    fn replies_cannot_be_replied_to() {
        let view = CommentView {
            author: AuthorSummary::unknown(Uuid::nil()),
            comment: comment(Some(Uuid::new_v4()), false),
        };
        assert_eq!(view.display_body(), "hi");
        assert!(!view.can_reply());
    }

    #[test]
    fn post_row_tolerates_missing_optional_columns() {
        let row = json!({
            "id": Uuid::nil(),
            "author_id": Uuid::nil(),
            "title": "t",
            "content": "c",
            "is_public": true,
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "updated_at": "2024-05-01T10:00:00+00:00",
        });
        let post: Post = serde_json::from_value(row).unwrap();
        assert!(post.tags.is_empty());
        assert_eq!(post.like_count, 0);
        assert_eq!(post.slug, None);
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        let patch = PostPatch::default();
        assert!(patch.is_empty());
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({}));
    }
}
