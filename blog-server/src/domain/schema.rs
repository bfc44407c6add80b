//! The collections exposed over REST and what callers may do with them.

use crate::domain::error::DomainError;
use derive_more::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Collection {
    #[display("posts")]
    Posts,
    #[display("comments")]
    Comments,
    #[display("profiles")]
    Profiles,
    #[display("likes")]
    Likes,
    #[display("comment_likes")]
    CommentLikes,
}

impl FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(Collection::Posts),
            "comments" => Ok(Collection::Comments),
            "profiles" => Ok(Collection::Profiles),
            "likes" => Ok(Collection::Likes),
            "comment_likes" => Ok(Collection::CommentLikes),
            other => Err(DomainError::NotFound(format!("collection {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    TextArray,
    Bool,
    BigInt,
    Timestamp,
}

impl ColumnType {
    /// Postgres type the bound text parameter is cast to.
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Uuid => "uuid",
            ColumnType::Text => "text",
            ColumnType::TextArray => "text[]",
            ColumnType::Bool => "boolean",
            ColumnType::BigInt => "bigint",
            ColumnType::Timestamp => "timestamptz",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

#[derive(Debug)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [Column],
    /// Column that must hold the caller's id for a write to be allowed.
    pub owner: &'static str,
    /// Empty when rows are never inserted over REST.
    pub insertable: &'static [&'static str],
    pub updatable: &'static [&'static str],
    /// Updatable columns that may be set but never cleared back to null.
    pub set_once: &'static [&'static str],
    pub deletable: bool,
    pub touches_updated_at: bool,
}

use ColumnType::*;

static POSTS: TableSchema = TableSchema {
    table: "posts",
    columns: &[
        col("id", Uuid),
        col("author_id", Uuid),
        col("title", Text),
        col("content", Text),
        col("slug", Text),
        col("thumbnail_url", Text),
        col("tags", TextArray),
        col("is_public", Bool),
        col("view_count", BigInt),
        col("like_count", BigInt),
        col("comment_count", BigInt),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
    ],
    owner: "author_id",
    insertable: &[
        "author_id",
        "title",
        "content",
        "slug",
        "thumbnail_url",
        "tags",
        "is_public",
    ],
    updatable: &["title", "content", "slug", "thumbnail_url", "tags", "is_public"],
    set_once: &[],
    deletable: true,
    touches_updated_at: true,
};

static COMMENTS: TableSchema = TableSchema {
    table: "comments",
    columns: &[
        col("id", Uuid),
        col("post_id", Uuid),
        col("parent_id", Uuid),
        col("author_id", Uuid),
        col("content", Text),
        col("like_count", BigInt),
        col("created_at", Timestamp),
        col("updated_at", Timestamp),
        col("deleted_at", Timestamp),
    ],
    owner: "author_id",
    insertable: &["post_id", "parent_id", "author_id", "content"],
    updatable: &["content", "deleted_at"],
    set_once: &["deleted_at"],
    // tombstoned through `deleted_at` so replies keep their parent
    deletable: false,
    touches_updated_at: true,
};

static PROFILES: TableSchema = TableSchema {
    table: "profiles",
    columns: &[
        col("id", Uuid),
        col("nickname", Text),
        col("bio", Text),
        col("avatar_url", Text),
        col("show_email", Bool),
        col("created_at", Timestamp),
    ],
    owner: "id",
    insertable: &[],
    updatable: &["nickname", "bio", "avatar_url", "show_email"],
    set_once: &[],
    deletable: false,
    touches_updated_at: false,
};

static LIKES: TableSchema = TableSchema {
    table: "likes",
    columns: &[
        col("user_id", Uuid),
        col("post_id", Uuid),
        col("created_at", Timestamp),
    ],
    owner: "user_id",
    insertable: &["user_id", "post_id"],
    updatable: &[],
    set_once: &[],
    deletable: true,
    touches_updated_at: false,
};

static COMMENT_LIKES: TableSchema = TableSchema {
    table: "comment_likes",
    columns: &[
        col("user_id", Uuid),
        col("comment_id", Uuid),
        col("created_at", Timestamp),
    ],
    owner: "user_id",
    insertable: &["user_id", "comment_id"],
    updatable: &[],
    set_once: &[],
    deletable: true,
    touches_updated_at: false,
};

impl Collection {
    pub fn schema(self) -> &'static TableSchema {
        match self {
            Collection::Posts => &POSTS,
            Collection::Comments => &COMMENTS,
            Collection::Profiles => &PROFILES,
            Collection::Likes => &LIKES,
            Collection::CommentLikes => &COMMENT_LIKES,
        }
    }
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Result<Column, DomainError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .copied()
            .ok_or_else(|| DomainError::BadRequest(format!("unknown column {}.{name}", self.table)))
    }

    pub fn can_insert(&self, name: &str) -> bool {
        self.insertable.contains(&name)
    }

    pub fn can_update(&self, name: &str) -> bool {
        self.updatable.contains(&name)
    }

    pub fn is_set_once(&self, name: &str) -> bool {
        self.set_once.contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("posts", Collection::Posts)]
    #[case("comment_likes", Collection::CommentLikes)]
    fn collections_round_trip_through_names(#[case] name: &str, #[case] collection: Collection) {
        assert_eq!(name.parse::<Collection>().unwrap(), collection);
        assert_eq!(collection.to_string(), name);
        assert_eq!(collection.schema().table, name);
    }

    #[test]
    fn unknown_collection_is_not_found() {
        assert!(matches!(
            "users".parse::<Collection>(),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn counters_are_never_writable() {
        for collection in [Collection::Posts, Collection::Comments] {
            let schema = collection.schema();
            for counter in ["like_count", "comment_count", "view_count", "id", "created_at"] {
                assert!(!schema.can_insert(counter));
                assert!(!schema.can_update(counter));
            }
        }
    }

    #[test]
    fn every_writable_column_exists() {
        for collection in [
            Collection::Posts,
            Collection::Comments,
            Collection::Profiles,
            Collection::Likes,
            Collection::CommentLikes,
        ] {
            let schema = collection.schema();
            for name in schema.insertable.iter().chain(schema.updatable) {
                assert!(schema.column(name).is_ok(), "{}.{name}", schema.table);
            }
            assert!(schema.column(schema.owner).is_ok());
            for name in schema.set_once {
                assert!(schema.can_update(name), "{}.{name}", schema.table);
            }
        }
    }

    #[test]
    fn profiles_and_likes_have_restricted_verbs() {
        assert!(Collection::Profiles.schema().insertable.is_empty());
        assert!(!Collection::Profiles.schema().deletable);
        assert!(!Collection::Comments.schema().deletable);
        assert!(Collection::Comments.schema().is_set_once("deleted_at"));
        assert!(Collection::Likes.schema().updatable.is_empty());
        assert!(Collection::CommentLikes.schema().updatable.is_empty());
    }
}
