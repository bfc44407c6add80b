use crate::error::BlogClientError;
use crate::model::{Post, PostView};
use crate::pager::{PageSource, Pager};
use crate::posts::{SEARCH_PAGE_SIZE, attach_authors, search_query};
use crate::query::{Collection, Filter, Order, Query};
use crate::validation::ValidationError;
use crate::{DataService, decode_rows};
use async_trait::async_trait;
use derive_more::Display;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub const FEED_PAGE_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum SortMode {
    #[default]
    #[display("latest")]
    Latest,
    #[display("popular")]
    Popular,
}

impl SortMode {
    fn orders(self) -> Vec<Order> {
        match self {
            SortMode::Latest => vec![Order::desc("created_at")],
            SortMode::Popular => vec![
                Order::desc("like_count"),
                Order::desc("comment_count"),
                Order::desc("created_at"),
            ],
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" => Ok(SortMode::Latest),
            "popular" => Ok(SortMode::Popular),
            other => Err(format!("unknown sort mode: {other}")),
        }
    }
}

/// Public posts in feed order with authors joined.
pub struct FeedSource<D: DataService + ?Sized> {
    data: Arc<D>,
}

impl<D: DataService + ?Sized> FeedSource<D> {
    pub fn new(data: Arc<D>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl<D: DataService + ?Sized> PageSource for FeedSource<D> {
    type Key = SortMode;
    type Item = PostView;

    async fn fetch_page(
        &self,
        sort: &SortMode,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<PostView>, BlogClientError> {
        let mut query = Query::new(Collection::Posts).filter(Filter::eq("is_public", true));
        for order in sort.orders() {
            query = query.order(order);
        }
        let query = query.page(page, page_size);
        let posts: Vec<Post> = decode_rows(self.data.select(&query).await?)?;
        debug!(%sort, page, rows = posts.len(), "feed page fetched");
        attach_authors(self.data.as_ref(), posts).await
    }
}

/// Search results page by page; the key is the search term.
pub struct SearchSource<D: DataService + ?Sized> {
    data: Arc<D>,
}

impl<D: DataService + ?Sized> SearchSource<D> {
    pub fn new(data: Arc<D>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl<D: DataService + ?Sized> PageSource for SearchSource<D> {
    type Key = String;
    type Item = PostView;

    async fn fetch_page(
        &self,
        term: &String,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<PostView>, BlogClientError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ValidationError::Required("search query").into());
        }
        let query = search_query(term).page(page, page_size);
        let posts: Vec<Post> = decode_rows(self.data.select(&query).await?)?;
        attach_authors(self.data.as_ref(), posts).await
    }
}

pub struct FeedService<D: DataService + ?Sized> {
    data: Arc<D>,
}

impl<D: DataService + ?Sized> Clone for FeedService<D> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<D: DataService + ?Sized> FeedService<D> {
    pub fn new(data: Arc<D>) -> Self {
        Self { data }
    }

    pub fn pager(&self, sort: SortMode) -> Pager<FeedSource<D>> {
        Pager::new(FeedSource::new(self.data.clone()), sort, FEED_PAGE_SIZE)
    }

    /// Blank terms are rejected here, before any page is requested.
    pub fn search_pager(&self, term: &str) -> Result<Pager<SearchSource<D>>, BlogClientError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ValidationError::Required("search query").into());
        }
        Ok(Pager::new(
            SearchSource::new(self.data.clone()),
            term.to_string(),
            SEARCH_PAGE_SIZE,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::model::ProfileSeed;
    use crate::pager::LoadOutcome;
    use crate::{AuthApi, DataService};
    use rstest::rstest;
    use serde_json::{Value, json};
    use uuid::Uuid;

    async fn backend_with_posts(titles: &[(&str, bool)]) -> (Arc<MemoryBackend>, Uuid, Vec<Value>) {
        let backend = Arc::new(MemoryBackend::new());
        let user = backend
            .sign_up("a@b.c", "secret1", ProfileSeed { nickname: "alice".into() })
            .await
            .unwrap()
            .user
            .id;
        let mut ids = Vec::new();
        for (title, public) in titles {
            let row = backend
                .insert(
                    Collection::Posts,
                    vec![json!({ "author_id": user, "title": title, "content": "c", "is_public": public })],
                )
                .await
                .unwrap()
                .remove(0);
            ids.push(row["id"].clone());
        }
        (backend, user, ids)
    }

    fn titles(items: &[PostView]) -> Vec<String> {
        items.iter().map(|v| v.post.title.clone()).collect()
    }

    #[rstest]
    #[case("latest", SortMode::Latest)]
    #[case("Popular", SortMode::Popular)]
    fn sort_modes_parse(#[case] input: &str, #[case] expected: SortMode) {
        assert_eq!(input.parse::<SortMode>().unwrap(), expected);
        assert!("oldest".parse::<SortMode>().is_err());
    }

    #[tokio::test]
    async fn five_public_posts_fill_one_short_page() {
        let posts: Vec<(&str, bool)> = ["a", "b", "c", "d", "e"].iter().map(|t| (*t, true)).collect();
        let (backend, _, _) = backend_with_posts(&posts).await;
        let pager = FeedService::new(backend).pager(SortMode::Latest);

        assert_eq!(pager.load_next().await.unwrap(), LoadOutcome::Loaded { added: 5 });
        assert!(pager.is_exhausted().await);
        assert_eq!(pager.load_next().await.unwrap(), LoadOutcome::Exhausted);
        let items = pager.items().await;
        assert_eq!(titles(&items), vec!["e", "d", "c", "b", "a"]);
        assert_eq!(items[0].author.nickname, "alice");
    }

    #[tokio::test]
    async fn feed_excludes_private_posts() {
        let (backend, _, _) = backend_with_posts(&[("open", true), ("hidden", false)]).await;
        let pager = FeedService::new(backend).pager(SortMode::Latest);
        pager.load_next().await.unwrap();
        assert_eq!(titles(&pager.items().await), vec!["open"]);
    }

    #[tokio::test]
    async fn popular_orders_by_likes_then_comments_then_recency() {
        let (backend, user, ids) =
            backend_with_posts(&[("liked", true), ("discussed", true), ("new", true)]).await;
        backend
            .insert(Collection::Likes, vec![json!({ "user_id": user, "post_id": ids[0] })])
            .await
            .unwrap();
        backend
            .insert(
                Collection::Comments,
                vec![json!({ "post_id": ids[1], "author_id": user, "content": "hi" })],
            )
            .await
            .unwrap();

        let pager = FeedService::new(backend).pager(SortMode::Popular);
        pager.load_next().await.unwrap();
        assert_eq!(titles(&pager.items().await), vec!["liked", "discussed", "new"]);
    }

    #[tokio::test]
    async fn switching_sort_clears_and_restarts() {
        let posts: Vec<(String, bool)> = (0..15).map(|i| (format!("p{i:02}"), true)).collect();
        let posts: Vec<(&str, bool)> = posts.iter().map(|(t, p)| (t.as_str(), *p)).collect();
        let (backend, user, ids) = backend_with_posts(&posts).await;
        backend
            .insert(Collection::Likes, vec![json!({ "user_id": user, "post_id": ids[0] })])
            .await
            .unwrap();

        let pager = FeedService::new(backend).pager(SortMode::Latest);
        pager.load_next().await.unwrap();
        pager.load_next().await.unwrap();
        assert_eq!(pager.items().await.len(), 15);
        assert_eq!(pager.next_page().await, 2);

        pager.reset(SortMode::Popular).await.unwrap();
        let items = pager.items().await;
        assert_eq!(items.len(), FEED_PAGE_SIZE);
        assert_eq!(items[0].post.title, "p00");
        assert_eq!(pager.next_page().await, 1);
        assert_eq!(pager.key().await, SortMode::Popular);
    }

    #[tokio::test]
    async fn search_pager_pages_through_matches() {
        let posts: Vec<(String, bool)> = (0..14).map(|i| (format!("rust {i}"), true)).collect();
        let posts: Vec<(&str, bool)> = posts.iter().map(|(t, p)| (t.as_str(), *p)).collect();
        let (backend, _, _) = backend_with_posts(&posts).await;
        backend.sign_out().await.unwrap();

        let pager = FeedService::new(backend).search_pager("  RUST ").unwrap();
        pager.load_next().await.unwrap();
        pager.load_next().await.unwrap();
        assert_eq!(pager.items().await.len(), 14);
        assert!(pager.is_exhausted().await);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    fn blank_search_terms_are_rejected(#[case] term: &str) {
        let service = FeedService::new(Arc::new(MemoryBackend::new()));
        assert!(matches!(
            service.search_pager(term),
            Err(BlogClientError::Validation(ValidationError::Required("search query")))
        ));
    }

    #[tokio::test]
    async fn blank_search_key_fails_the_fetch() {
        let (backend, _, _) = backend_with_posts(&[("rust", true)]).await;
        let source = SearchSource::new(backend);
        let err = source.fetch_page(&"  ".to_string(), 0, SEARCH_PAGE_SIZE).await.unwrap_err();
        assert!(matches!(err, BlogClientError::Validation(_)));
    }
}
