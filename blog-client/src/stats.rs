use crate::model::PostStat;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfileStats {
    pub post_count: usize,
    pub total_likes: i64,
}

impl ProfileStats {
    /// Full recount; nothing is maintained incrementally.
    pub fn from_posts(posts: &[PostStat]) -> Self {
        Self {
            post_count: posts.len(),
            total_likes: posts.iter().map(|p| p.like_count.max(0)).sum(),
        }
    }
}
