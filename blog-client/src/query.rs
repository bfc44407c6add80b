//! Query description shared by every data service implementation.
//!
//! A [`Query`] serializes to the JSON body the backend's
//! `/api/rest/{collection}/select` endpoint expects.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    IsNull { column: String },
    NotNull { column: String },
    /// Case-insensitive `LIKE`; `%` and `_` are wildcards, `\` escapes.
    Ilike { column: String, pattern: String },
    Or { filters: Vec<Filter> },
}

impl Filter {
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Filter::Eq {
            column: column.to_string(),
            value: to_value(value),
        }
    }

    pub fn neq(column: &str, value: impl Serialize) -> Self {
        Filter::Neq {
            column: column.to_string(),
            value: to_value(value),
        }
    }

    pub fn is_in<T: Serialize>(column: &str, values: impl IntoIterator<Item = T>) -> Self {
        Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(to_value).collect(),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull {
            column: column.to_string(),
        }
    }

    pub fn not_null(column: &str) -> Self {
        Filter::NotNull {
            column: column.to_string(),
        }
    }

    pub fn ilike(column: &str, pattern: impl Into<String>) -> Self {
        Filter::Ilike {
            column: column.to_string(),
            pattern: pattern.into(),
        }
    }

    /// `column ILIKE %needle%` with the needle's wildcards escaped.
    pub fn contains(column: &str, needle: &str) -> Self {
        Filter::ilike(column, format!("%{}%", escape_like(needle)))
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Escapes `LIKE` metacharacters so user input matches literally.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl Order {
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub offset: usize,
    pub limit: usize,
}

impl Range {
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            offset: page * page_size,
            limit: page_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    #[serde(skip)]
    pub collection: Collection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn page(self, page: usize, page_size: usize) -> Self {
        self.range(Range::page(page, page_size))
    }
}
