//! Page-at-a-time loading into a growing list.
//!
//! A [`Pager`] is driven by a level-triggered "show more" signal: it may be
//! asked to continue any number of times while a request is outstanding and
//! issues at most one request at a time. Every reset bumps a generation
//! counter; responses that belong to an older generation are dropped.

use crate::error::BlogClientError;
use crate::model::Identified;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Debug;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[async_trait]
pub trait PageSource: Send + Sync {
    /// What selects the list: a sort mode, a post id, ...
    type Key: Clone + Debug + Send + Sync;
    type Item: Identified + Clone + Send + Sync;

    async fn fetch_page(
        &self,
        key: &Self::Key,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Self::Item>, BlogClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { added: usize },
    /// Another request is in flight.
    Busy,
    Exhausted,
    Closed,
    /// The response arrived after a reset and was discarded.
    Stale,
}

struct Request<K> {
    page: usize,
    key: K,
    generation: u64,
}

struct PagerState<K, T> {
    key: K,
    next_page: usize,
    items: Vec<T>,
    exhausted: bool,
    busy: bool,
    generation: u64,
    closed: bool,
}

pub struct Pager<S: PageSource> {
    source: S,
    page_size: usize,
    state: Mutex<PagerState<S::Key, S::Item>>,
}

impl<S: PageSource> Pager<S> {
    pub fn new(source: S, key: S::Key, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            state: Mutex::new(PagerState {
                key,
                next_page: 0,
                items: Vec::new(),
                exhausted: false,
                busy: false,
                generation: 0,
                closed: false,
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Continuation signal: loads the next page unless busy or done.
    pub async fn load_next(&self) -> Result<LoadOutcome, BlogClientError> {
        match self.begin(None).await {
            Ok(request) => self.apply(request, false).await,
            Err(outcome) => Ok(outcome),
        }
    }

    /// Requests page `page` for the current key; `replace` swaps the list
    /// instead of appending to it.
    pub async fn fetch_page(&self, page: usize, replace: bool) -> Result<LoadOutcome, BlogClientError> {
        match self.begin(Some(page)).await {
            Ok(request) => self.apply(request, replace).await,
            Err(outcome) => Ok(outcome),
        }
    }

    /// Claims the pager for one request. The page to load is chosen under
    /// the same lock that sets `busy`; `None` means the next page.
    async fn begin(&self, page: Option<usize>) -> Result<Request<S::Key>, LoadOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(LoadOutcome::Closed);
        }
        if state.busy {
            return Err(LoadOutcome::Busy);
        }
        if page.is_none() && state.exhausted {
            return Err(LoadOutcome::Exhausted);
        }
        state.busy = true;
        Ok(Request {
            page: page.unwrap_or(state.next_page),
            key: state.key.clone(),
            generation: state.generation,
        })
    }

    #[instrument(skip(self, request), fields(page = request.page))]
    async fn apply(&self, request: Request<S::Key>, replace: bool) -> Result<LoadOutcome, BlogClientError> {
        let Request {
            page,
            key,
            generation,
        } = request;
        let result = self.source.fetch_page(&key, page, self.page_size).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(page, ?key, "discarding response from a superseded request");
            return Ok(LoadOutcome::Stale);
        }
        state.busy = false;
        let rows = result?;

        let fetched = rows.len();
        let added = if replace {
            state.items = rows;
            fetched
        } else {
            let seen: HashSet<_> = state.items.iter().map(Identified::id).collect();
            let before = state.items.len();
            state
                .items
                .extend(rows.into_iter().filter(|item| !seen.contains(&item.id())));
            state.items.len() - before
        };
        state.exhausted = fetched < self.page_size;
        state.next_page = page + 1;
        debug!(page, fetched, added, exhausted = state.exhausted, "page applied");
        Ok(LoadOutcome::Loaded { added })
    }

    /// Starts over with `key` from page zero. Whatever is in flight for
    /// the previous key is discarded when it lands.
    pub async fn reset(&self, key: S::Key) -> Result<LoadOutcome, BlogClientError> {
        {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.key = key;
            state.items.clear();
            state.next_page = 0;
            state.exhausted = false;
            state.busy = false;
            state.closed = false;
        }
        self.fetch_page(0, true).await
    }

    pub async fn refresh(&self) -> Result<LoadOutcome, BlogClientError> {
        let key = self.state.lock().await.key.clone();
        self.reset(key).await
    }

    /// Stops applying responses, e.g. when the view goes away.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.closed = true;
        state.busy = false;
    }

    pub async fn items(&self) -> Vec<S::Item> {
        self.state.lock().await.items.clone()
    }

    pub async fn key(&self) -> S::Key {
        self.state.lock().await.key.clone()
    }

    pub async fn is_exhausted(&self) -> bool {
        self.state.lock().await.exhausted
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.busy
    }

    /// Index of the page the next continuation will request.
    pub async fn next_page(&self) -> usize {
        self.state.lock().await.next_page
    }
}
