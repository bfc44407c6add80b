use crate::error::BlogClientError;
use crate::model::{NewPost, Post, PostPatch, PostView};
use crate::profile::{author_for, load_authors, object_path};
use crate::query::{Collection, Filter, Order, Query};
use crate::session::SessionContext;
use crate::slug::{slugify, with_random_suffix};
use crate::validation::{ValidationError, validate_content, validate_tags, validate_title};
use crate::{DataService, StorageApi, decode_one, decode_rows, encode};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const THUMBNAIL_BUCKET: &str = "thumbnails";
pub const SEARCH_PAGE_SIZE: usize = 12;

/// What the composer hands over; tags are already parsed.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub thumbnail_url: Option<String>,
}

/// Joins author summaries onto `posts`, keeping their order.
pub async fn attach_authors<D: DataService + ?Sized>(
    data: &D,
    posts: Vec<Post>,
) -> Result<Vec<PostView>, BlogClientError> {
    let authors = load_authors(data, posts.iter().map(|p| p.author_id)).await?;
    Ok(posts
        .into_iter()
        .map(|post| PostView {
            author: author_for(&authors, post.author_id),
            post,
        })
        .collect())
}

/// Public posts whose title or content contains `term`, latest first.
pub(crate) fn search_query(term: &str) -> Query {
    Query::new(Collection::Posts)
        .filter(Filter::eq("is_public", true))
        .filter(Filter::or(vec![
            Filter::contains("title", term),
            Filter::contains("content", term),
        ]))
        .order(Order::desc("created_at"))
}

#[derive(Clone)]
pub struct PostService<D: DataService + StorageApi + 'static> {
    data: Arc<D>,
    session: SessionContext,
}

impl<D> PostService<D>
where
    D: DataService + StorageApi + 'static,
{
    pub fn new(data: Arc<D>, session: SessionContext) -> Self {
        Self { data, session }
    }

    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn create_post(&self, draft: PostDraft) -> Result<PostView, BlogClientError> {
        let author_id = self.session.require_user()?;
        validate_title(&draft.title)?;
        validate_content(&draft.content)?;
        validate_tags(&draft.tags)?;

        let title = draft.title.trim().to_string();
        let slug = slugify(&title);
        let mut record = NewPost {
            author_id,
            title,
            content: draft.content,
            slug: (!slug.is_empty()).then(|| slug.clone()),
            thumbnail_url: draft.thumbnail_url,
            tags: draft.tags,
            is_public: draft.is_public,
        };

        let rows = match self
            .data
            .insert(Collection::Posts, vec![encode(&record)?])
            .await
        {
            Err(err) if err.is_conflict() && record.slug.is_some() => {
                warn!(slug = %slug, "slug taken, retrying with a suffix");
                record.slug = Some(with_random_suffix(&slug));
                self.data
                    .insert(Collection::Posts, vec![encode(&record)?])
                    .await?
            }
            other => other?,
        };
        let post: Post = decode_one(rows)?;
        info!(post_id = %post.id, "post created");
        self.with_author(post).await
    }

    /// Author-only; the check here is advisory, the backend enforces it too.
    #[instrument(skip(self, patch))]
    pub async fn update_post(&self, id: Uuid, patch: PostPatch) -> Result<PostView, BlogClientError> {
        let user = self.session.require_user()?;
        let mut patch = patch;
        if let Some(title) = patch.title.as_mut() {
            validate_title(title)?;
            *title = title.trim().to_string();
        }
        if let Some(content) = patch.content.as_ref() {
            validate_content(content)?;
        }
        if let Some(tags) = patch.tags.as_ref() {
            validate_tags(tags)?;
        }

        let current = self.get_post(id).await?;
        if current.post.author_id != user {
            return Err(BlogClientError::Forbidden);
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let rows = self
            .data
            .update(Collection::Posts, encode(&patch)?, vec![Filter::eq("id", id)])
            .await?;
        let post: Post = decode_one(rows)?;
        info!(post_id = %post.id, "post updated");
        Ok(PostView {
            post,
            author: current.author,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_post(&self, id: Uuid) -> Result<(), BlogClientError> {
        let user = self.session.require_user()?;
        let current = self.get_post(id).await?;
        if current.post.author_id != user {
            return Err(BlogClientError::Forbidden);
        }
        let removed = self
            .data
            .delete(Collection::Posts, vec![Filter::eq("id", id)])
            .await?;
        if removed.is_empty() {
            return Err(BlogClientError::NotFound);
        }
        info!(post_id = %id, "post deleted");
        Ok(())
    }

    pub async fn get_post(&self, id: Uuid) -> Result<PostView, BlogClientError> {
        let query = Query::new(Collection::Posts).filter(Filter::eq("id", id));
        let post: Post = decode_one(self.data.select(&query).await?)?;
        self.with_author(post).await
    }

    pub async fn get_post_by_slug(&self, slug: &str) -> Result<PostView, BlogClientError> {
        let query = Query::new(Collection::Posts).filter(Filter::eq("slug", slug));
        let post: Post = decode_one(self.data.select(&query).await?)?;
        self.with_author(post).await
    }

    /// Posts by `author_id`, newest first. Private ones come back only
    /// when the caller is that author.
    pub async fn list_by_author(
        &self,
        author_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<PostView>, BlogClientError> {
        let query = Query::new(Collection::Posts)
            .filter(Filter::eq("author_id", author_id))
            .order(Order::desc("created_at"))
            .page(page, page_size);
        let posts: Vec<Post> = decode_rows(self.data.select(&query).await?)?;
        attach_authors(self.data.as_ref(), posts).await
    }

    #[instrument(skip(self))]
    pub async fn search(&self, term: &str, page: usize) -> Result<Vec<PostView>, BlogClientError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ValidationError::Required("search query").into());
        }
        let query = search_query(term).page(page, SEARCH_PAGE_SIZE);
        let posts: Vec<Post> = decode_rows(self.data.select(&query).await?)?;
        attach_authors(self.data.as_ref(), posts).await
    }

    /// Stores a thumbnail and returns its public URL for the composer.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_thumbnail(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlogClientError> {
        let user = self.session.require_user()?;
        let path = object_path(user, file_name);
        self.data
            .upload(THUMBNAIL_BUCKET, &path, bytes, content_type)
            .await
    }

    async fn with_author(&self, post: Post) -> Result<PostView, BlogClientError> {
        attach_authors(self.data.as_ref(), vec![post])
            .await?
            .pop()
            .ok_or(BlogClientError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::model::ProfileSeed;
    use crate::session::SessionManager;
    use crate::store::MemoryStore;
    use crate::AuthApi;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        manager: SessionManager<MemoryBackend, MemoryStore>,
        posts: PostService<MemoryBackend>,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionManager::new(backend.clone(), Arc::new(MemoryStore::new()));
        manager
            .sign_up("a@b.c", "secret1", ProfileSeed { nickname: "alice".into() })
            .await
            .unwrap();
        let posts = PostService::new(backend.clone(), manager.context());
        Fixture {
            backend,
            manager,
            posts,
        }
    }

    fn draft(title: &str, public: bool) -> PostDraft {
        PostDraft {
            title: title.into(),
            content: format!("body of {title}"),
            tags: vec!["rust".into()],
            is_public: public,
            thumbnail_url: None,
        }
    }

    #[tokio::test]
    async fn create_post_stores_slug_and_joins_author() {
        let f = fixture().await;
        let view = f.posts.create_post(draft("Hello, World!", true)).await.unwrap();
        assert_eq!(view.post.slug.as_deref(), Some("hello-world"));
        assert_eq!(view.author.nickname, "alice");

        let by_slug = f.posts.get_post_by_slug("hello-world").await.unwrap();
        assert_eq!(by_slug.post.id, view.post.id);
    }

    #[tokio::test]
    async fn slug_collision_retries_once_with_suffix() {
        let f = fixture().await;
        f.posts.create_post(draft("Same Title", true)).await.unwrap();
        let second = f.posts.create_post(draft("Same Title", true)).await.unwrap();
        let slug = second.post.slug.unwrap();
        assert!(slug.starts_with("same-title-"));
        assert_eq!(slug.len(), "same-title-".len() + 6);
    }

    #[tokio::test]
    async fn invalid_drafts_fail_before_the_network() {
        let f = fixture().await;
        let mut bad = draft("", true);
        assert!(matches!(
            f.posts.create_post(bad.clone()).await,
            Err(BlogClientError::Validation(ValidationError::Required("title")))
        ));
        bad.title = "ok".into();
        bad.tags = (0..6).map(|i| format!("t{i}")).collect();
        assert!(matches!(
            f.posts.create_post(bad).await,
            Err(BlogClientError::Validation(ValidationError::TooManyTags))
        ));
        assert_eq!(f.backend.count(Collection::Posts, vec![]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn only_the_author_may_edit_or_delete() {
        let f = fixture().await;
        let post = f.posts.create_post(draft("Mine", true)).await.unwrap();
        f.manager.sign_out().await.unwrap();
        f.manager
            .sign_up("b@b.c", "secret1", ProfileSeed { nickname: "bob".into() })
            .await
            .unwrap();

        let patch = PostPatch {
            title: Some("Stolen".into()),
            ..PostPatch::default()
        };
        assert!(matches!(
            f.posts.update_post(post.post.id, patch).await,
            Err(BlogClientError::Forbidden)
        ));
        assert!(matches!(
            f.posts.delete_post(post.post.id).await,
            Err(BlogClientError::Forbidden)
        ));
        assert_eq!(f.posts.get_post(post.post.id).await.unwrap().post.title, "Mine");
    }

    #[tokio::test]
    async fn author_updates_and_deletes() {
        let f = fixture().await;
        let post = f.posts.create_post(draft("Draft", false)).await.unwrap();
        let updated = f
            .posts
            .update_post(
                post.post.id,
                PostPatch {
                    title: Some(" Final ".into()),
                    is_public: Some(true),
                    ..PostPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.post.title, "Final");
        assert!(updated.post.is_public);
        assert_eq!(updated.post.slug, post.post.slug);

        f.posts.delete_post(post.post.id).await.unwrap();
        assert!(matches!(
            f.posts.get_post(post.post.id).await,
            Err(BlogClientError::NotFound)
        ));
    }

    #[tokio::test]
    async fn search_matches_title_or_content_of_public_posts() {
        let f = fixture().await;
        f.posts.create_post(draft("Learning Rust", true)).await.unwrap();
        f.posts.create_post(draft("Cooking", true)).await.unwrap();
        f.posts.create_post(draft("Secret rust notes", false)).await.unwrap();
        let mut other = draft("Gardening", true);
        other.content = "rusty tools".into();
        f.posts.create_post(other).await.unwrap();

        let hits = f.posts.search("RUST", 0).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|v| v.post.title.as_str()).collect();
        assert_eq!(titles, vec!["Gardening", "Learning Rust"]);

        assert!(f.posts.search("100%", 0).await.unwrap().is_empty());
        assert!(matches!(
            f.posts.search("   ", 0).await,
            Err(BlogClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn private_posts_are_listed_for_their_author_only() {
        let f = fixture().await;
        let author = f.manager.context().require_user().unwrap();
        f.posts.create_post(draft("Public", true)).await.unwrap();
        f.posts.create_post(draft("Private", false)).await.unwrap();
        assert_eq!(f.posts.list_by_author(author, 0, 10).await.unwrap().len(), 2);

        f.backend.sign_out().await.unwrap();
        let visible = f.posts.list_by_author(author, 0, 10).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].post.title, "Public");
    }

    #[tokio::test]
    async fn thumbnail_upload_returns_public_url() {
        let f = fixture().await;
        let url = f
            .posts
            .upload_thumbnail("cover.webp", vec![9; 4], "image/webp")
            .await
            .unwrap();
        assert!(url.starts_with("memory://thumbnails/"));
        assert!(url.ends_with(".webp"));
    }
}
