use uuid::Uuid;

pub const SLUG_MAX_CHARS: usize = 50;
const SUFFIX_LEN: usize = 6;

/// URL-friendly form of a post title.
///
/// Letters and digits of any script survive (so Hangul titles keep their
/// text), punctuation is dropped and whitespace becomes `-`.
///
/// ```
/// use blog_client::slug::slugify;
///
/// assert_eq!(slugify("Hello, World!  Foo"), "hello-world-foo");
/// assert_eq!(slugify("러스트 입문"), "러스트-입문");
/// ```
pub fn slugify(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    let mut slug = String::with_capacity(cleaned.len());
    for ch in cleaned.chars() {
        let ch = if ch.is_whitespace() { '-' } else { ch };
        if ch == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(ch);
    }

    slug.trim_matches('-').chars().take(SLUG_MAX_CHARS).collect()
}

/// Slug used for the single retry after a collision.
pub fn with_random_suffix(slug: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(SUFFIX_LEN).collect();
    if slug.is_empty() {
        suffix
    } else {
        format!("{slug}-{suffix}")
    }
}
