//! Input checks run before any request leaves the client.

use thiserror::Error;

pub const TITLE_MAX_CHARS: usize = 100;
pub const COMMENT_MAX_CHARS: usize = 1000;
pub const BIO_MAX_CHARS: usize = 200;
pub const NICKNAME_MIN_CHARS: usize = 2;
pub const NICKNAME_MAX_CHARS: usize = 20;
pub const TAG_MAX_CHARS: usize = 20;
pub const MAX_TAGS: usize = 5;
pub const PASSWORD_MIN_CHARS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be at least {min} characters")]
    TooShort { field: &'static str, min: usize },
    #[error("at most 5 tags are allowed")]
    TooManyTags,
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("replies can only be posted to top-level comments")]
    NestedReply,
    #[error("deleted comments cannot be changed")]
    CommentDeleted,
}

fn chars(s: &str) -> usize {
    s.chars().count()
}

pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::Required("title"));
    }
    if chars(title) > TITLE_MAX_CHARS {
        return Err(ValidationError::TooLong {
            field: "title",
            max: TITLE_MAX_CHARS,
        });
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Required("content"));
    }
    Ok(())
}

pub fn validate_comment(body: &str) -> Result<(), ValidationError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ValidationError::Required("comment"));
    }
    if chars(body) > COMMENT_MAX_CHARS {
        return Err(ValidationError::TooLong {
            field: "comment",
            max: COMMENT_MAX_CHARS,
        });
    }
    Ok(())
}

pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let len = chars(nickname.trim());
    if len == 0 {
        return Err(ValidationError::Required("nickname"));
    }
    if len < NICKNAME_MIN_CHARS {
        return Err(ValidationError::TooShort {
            field: "nickname",
            min: NICKNAME_MIN_CHARS,
        });
    }
    if len > NICKNAME_MAX_CHARS {
        return Err(ValidationError::TooLong {
            field: "nickname",
            max: NICKNAME_MAX_CHARS,
        });
    }
    Ok(())
}

pub fn validate_bio(bio: &str) -> Result<(), ValidationError> {
    if chars(bio) > BIO_MAX_CHARS {
        return Err(ValidationError::TooLong {
            field: "bio",
            max: BIO_MAX_CHARS,
        });
    }
    Ok(())
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Required("email"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(ValidationError::InvalidEmail),
    }
    if password.is_empty() {
        return Err(ValidationError::Required("password"));
    }
    if chars(password) < PASSWORD_MIN_CHARS {
        return Err(ValidationError::TooShort {
            field: "password",
            min: PASSWORD_MIN_CHARS,
        });
    }
    Ok(())
}

/// Parses comma separated tag input (`"rust, #async,web"`).
///
/// Tags are trimmed, a leading `#` is dropped and duplicates are removed
/// keeping the first occurrence. Empty segments are ignored.
pub fn parse_tags(input: &str) -> Result<Vec<String>, ValidationError> {
    let mut tags: Vec<String> = Vec::new();
    for raw in input.split(',') {
        let tag = raw.trim();
        let tag = tag.strip_prefix('#').unwrap_or(tag).trim();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().any(char::is_whitespace) || tag.contains('#') {
            return Err(ValidationError::InvalidTag(tag.to_string()));
        }
        if chars(tag) > TAG_MAX_CHARS {
            return Err(ValidationError::InvalidTag(tag.to_string()));
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    validate_tags(&tags)?;
    Ok(tags)
}

pub fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn title_rules() {
        assert_eq!(validate_title("  "), Err(ValidationError::Required("title")));
        assert!(validate_title("hello").is_ok());
        assert!(matches!(
            validate_title(&"x".repeat(101)),
            Err(ValidationError::TooLong { field: "title", .. })
        ));
    }

    #[test]
    fn comment_length_counts_characters_not_bytes() {
        assert!(validate_comment(&"한".repeat(1000)).is_ok());
        assert!(validate_comment(&"한".repeat(1001)).is_err());
        assert!(validate_comment(" \n").is_err());
    }

    #[rstest]
    #[case("a@b.c", "secret1", true)]
    #[case("ab.c", "secret1", false)]
    #[case("@b.c", "secret1", false)]
    #[case("a@", "secret1", false)]
    #[case("a@b.c", "short", false)]
    #[case("", "secret1", false)]
    fn credential_rules(#[case] email: &str, #[case] password: &str, #[case] ok: bool) {
        assert_eq!(validate_credentials(email, password).is_ok(), ok);
    }

    #[test]
    fn nickname_and_bio_limits() {
        assert!(validate_nickname("a").is_err());
        assert!(validate_nickname("ab").is_ok());
        assert!(validate_nickname(&"n".repeat(21)).is_err());
        assert!(validate_bio(&"b".repeat(200)).is_ok());
        assert!(validate_bio(&"b".repeat(201)).is_err());
    }

    #[test]
    fn parses_and_dedupes_tags() {
        let tags = parse_tags(" rust, #async,,rust ,web ").unwrap();
        assert_eq!(tags, vec!["rust", "async", "web"]);
    }

    #[test]
    fn rejects_malformed_and_excess_tags() {
        assert_eq!(
            parse_tags("two words"),
            Err(ValidationError::InvalidTag("two words".into()))
        );
        assert!(parse_tags(&"t".repeat(21)).is_err());
        assert_eq!(parse_tags("a,b,c,d,e,f"), Err(ValidationError::TooManyTags));
        assert_eq!(parse_tags("a,b,c,d,e").unwrap().len(), 5);
        assert!(parse_tags("").unwrap().is_empty());
    }
}
