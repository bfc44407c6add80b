use crate::error::BlogClientError;
use crate::store::{KeyValueStore, RECENT_SEARCHES_KEY};
use regex::RegexBuilder;
use std::sync::Arc;
use tracing::warn;

pub const MAX_RECENT_SEARCHES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span<'a> {
    Plain(&'a str),
    Match(&'a str),
}

impl<'a> Span<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Span::Plain(text) | Span::Match(text) => text,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Span::Match(_))
    }
}

/// Splits `text` into plain and matched spans for every case-insensitive
/// occurrence of `query`. The query is matched literally.
///
/// Concatenating the span texts always yields `text` again.
pub fn highlight<'a>(text: &'a str, query: &str) -> Vec<Span<'a>> {
    if query.is_empty() {
        return vec![Span::Plain(text)];
    }
    let pattern = match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(pattern) => pattern,
        Err(err) => {
            warn!(error = %err, "highlight pattern rejected, rendering plain text");
            return vec![Span::Plain(text)];
        }
    };

    let mut spans = Vec::new();
    let mut cursor = 0;
    for found in pattern.find_iter(text) {
        if found.start() > cursor {
            spans.push(Span::Plain(&text[cursor..found.start()]));
        }
        spans.push(Span::Match(found.as_str()));
        cursor = found.end();
    }
    if cursor < text.len() || spans.is_empty() {
        spans.push(Span::Plain(&text[cursor..]));
    }
    spans
}

/// Most-recent-first list of search terms, capped at five entries.
#[derive(Clone)]
pub struct RecentSearches<S: KeyValueStore> {
    store: Arc<S>,
}

impl<S: KeyValueStore> RecentSearches<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<String> {
        self.store
            .get_json::<Vec<String>>(RECENT_SEARCHES_KEY)
            .unwrap_or_default()
    }

    /// Records `term`, moving it to the front if it was already present.
    pub fn record(&self, term: &str) -> Result<Vec<String>, BlogClientError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(self.list());
        }
        let mut terms = self.list();
        terms.retain(|t| t != term);
        terms.insert(0, term.to_string());
        terms.truncate(MAX_RECENT_SEARCHES);
        self.store.set_json(RECENT_SEARCHES_KEY, &terms)?;
        Ok(terms)
    }

    pub fn remove(&self, term: &str) -> Result<Vec<String>, BlogClientError> {
        let mut terms = self.list();
        terms.retain(|t| t != term);
        self.store.set_json(RECENT_SEARCHES_KEY, &terms)?;
        Ok(terms)
    }

    pub fn clear(&self) -> Result<(), BlogClientError> {
        self.store.remove(RECENT_SEARCHES_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rstest::rstest;

    fn rebuild(spans: &[Span<'_>]) -> String {
        spans.iter().map(Span::text).collect()
    }

    #[test]
    fn highlights_every_occurrence() {
        let spans = highlight("the cat sat", "at");
        assert_eq!(rebuild(&spans), "the cat sat");
        let matched: Vec<_> = spans.iter().filter(|s| s.is_match()).map(Span::text).collect();
        assert_eq!(matched, vec!["at", "at"]);
        assert_eq!(
            spans,
            vec![
                Span::Plain("the c"),
                Span::Match("at"),
                Span::Plain(" s"),
                Span::Match("at"),
            ]
        );
    }

    #[rstest]
    #[case("Rust is RUSTy", "rust", 2)]
    #[case("price: $5.00 (approx)", "$5.00 (", 1)]
    #[case("a.b.c", ".", 2)]
    #[case("no hits here", "zzz", 0)]
    #[case("한글 검색 한글", "한글", 2)]
    fn matches_literally_and_case_insensitively(
        #[case] text: &str,
        #[case] query: &str,
        #[case] hits: usize,
    ) {
        let spans = highlight(text, query);
        assert_eq!(rebuild(&spans), text);
        assert_eq!(spans.iter().filter(|s| s.is_match()).count(), hits);
    }

    #[test]
    fn empty_query_is_one_plain_span() {
        assert_eq!(highlight("text", ""), vec![Span::Plain("text")]);
        assert_eq!(highlight("", ""), vec![Span::Plain("")]);
    }

    #[test]
    fn whole_text_match_has_no_plain_spans() {
        assert_eq!(highlight("Cat", "cat"), vec![Span::Match("Cat")]);
    }

    #[test]
    fn recent_searches_are_capped_and_deduplicated() {
        let recent = RecentSearches::new(Arc::new(MemoryStore::new()));
        for term in ["a", "b", "c", "d", "e", "f"] {
            recent.record(term).unwrap();
        }
        assert_eq!(recent.list(), vec!["f", "e", "d", "c", "b"]);

        recent.record("  d ").unwrap();
        assert_eq!(recent.list(), vec!["d", "f", "e", "c", "b"]);

        recent.record("   ").unwrap();
        assert_eq!(recent.list().len(), 5);

        recent.remove("f").unwrap();
        assert_eq!(recent.list(), vec!["d", "e", "c", "b"]);
        recent.clear().unwrap();
        assert!(recent.list().is_empty());
    }
}
