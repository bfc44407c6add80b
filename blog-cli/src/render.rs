use blog_client::comments::CommentThread;
use blog_client::likes::LikeState;
use blog_client::model::{CommentView, PostView, Profile};
use blog_client::search::{Span, highlight};
use blog_client::stats::ProfileStats;
use chrono::{DateTime, Utc};
use std::fmt::Write;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const EXCERPT_CHARS: usize = 80;

fn date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// First line of `text`, cut to `max` characters.
pub fn excerpt(text: &str, max: usize) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() <= max {
        return line.to_string();
    }
    let cut: String = line.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// Wraps every match of `query` in bold.
pub fn highlighted(text: &str, query: &str) -> String {
    highlight(text, query)
        .iter()
        .map(|span| match span {
            Span::Match(t) => format!("{BOLD}{t}{RESET}"),
            Span::Plain(t) => t.to_string(),
        })
        .collect()
}

pub fn post_line(view: &PostView) -> String {
    let post = &view.post;
    let mut line = format!(
        "[{}] {} by {} · ♥ {} · 💬 {} · {}",
        post.id,
        post.title,
        view.author.nickname,
        post.like_count,
        post.comment_count,
        date(post.created_at)
    );
    if !post.is_public {
        line.push_str(" · private");
    }
    line
}

pub fn search_result(view: &PostView, query: &str) -> String {
    format!(
        "[{}] {}\n    {}",
        view.post.id,
        highlighted(&view.post.title, query),
        highlighted(&excerpt(&view.post.content, EXCERPT_CHARS), query)
    )
}

pub fn post_detail(view: &PostView, like: &LikeState) -> String {
    let post = &view.post;
    let mut out = String::new();
    let _ = writeln!(out, "{}", post.title);
    let _ = writeln!(out, "by {} · {}", view.author.nickname, date(post.created_at));
    if let Some(slug) = &post.slug {
        let _ = writeln!(out, "slug: {slug}");
    }
    if !post.tags.is_empty() {
        let tags: Vec<String> = post.tags.iter().map(|t| format!("#{t}")).collect();
        let _ = writeln!(out, "{}", tags.join(" "));
    }
    if let Some(url) = &post.thumbnail_url {
        let _ = writeln!(out, "thumbnail: {url}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", post.content);
    let _ = writeln!(out);
    let _ = write!(out, "{} · 💬 {}", like_line(like), post.comment_count);
    out
}

pub fn like_line(state: &LikeState) -> String {
    let heart = if state.liked { "♥" } else { "♡" };
    format!("{heart} {}", state.count)
}

fn comment_line(c: &CommentView, indent: &str) -> String {
    let mut line = format!(
        "{indent}[{}] {}: {}",
        c.comment.id,
        c.author.nickname,
        c.display_body()
    );
    if !c.comment.is_deleted() {
        let _ = write!(line, " · ♥ {} · {}", c.comment.like_count, date(c.comment.created_at));
        if c.comment.updated_at > c.comment.created_at {
            line.push_str(" (edited)");
        }
    }
    line
}

pub fn thread(thread: &CommentThread) -> String {
    let mut out = String::new();
    for root in &thread.roots {
        let _ = writeln!(out, "{}", comment_line(&root.comment, ""));
        for reply in &root.replies {
            let _ = writeln!(out, "{}", comment_line(reply, "    ↳ "));
        }
    }
    out
}

pub fn profile(profile: &Profile, email: Option<&str>, stats: &ProfileStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", profile.nickname, profile.id);
    if let Some(email) = email.filter(|_| profile.show_email) {
        let _ = writeln!(out, "email: {email}");
    }
    if let Some(bio) = profile.bio.as_deref().filter(|b| !b.is_empty()) {
        let _ = writeln!(out, "{bio}");
    }
    if let Some(url) = &profile.avatar_url {
        let _ = writeln!(out, "avatar: {url}");
    }
    let _ = write!(
        out,
        "posts: {} · likes received: {} · joined {}",
        stats.post_count,
        stats.total_likes,
        profile.created_at.format("%Y-%m-%d")
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blog_client::model::{AuthorSummary, Comment};
    use chrono::TimeZone;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    #[case::short("hello", 10, "hello")]
    #[case::first_line("\n  title line\nbody", 20, "title line")]
    #[case::cut("abcdefghij", 5, "abcd…")]
    #[case::multibyte("ééééé", 3, "éé…")]
    fn excerpts(#[case] text: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(excerpt(text, max), expected);
    }

    #[test]
    fn highlights_matches_in_bold() {
        assert_eq!(
            highlighted("Rust and rust", "rust"),
            format!("{BOLD}Rust{RESET} and {BOLD}rust{RESET}")
        );
        assert_eq!(highlighted("plain", ""), "plain");
    }

    #[test]
    fn like_line_shows_state() {
        let id = Uuid::new_v4();
        let liked = LikeState {
            target_id: id,
            liked: true,
            count: 3,
        };
        assert_eq!(like_line(&liked), "♥ 3");
        assert_eq!(
            like_line(&LikeState {
                liked: false,
                ..liked
            }),
            "♡ 3"
        );
    }

    fn comment(parent: Option<Uuid>, minute: u32, deleted: bool) -> CommentView {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap();
        let author = Uuid::new_v4();
        CommentView {
            comment: Comment {
                id: Uuid::new_v4(),
                post_id: Uuid::nil(),
                parent_id: parent,
                author_id: author,
                content: "hi there".into(),
                like_count: 1,
                created_at: at,
                updated_at: at,
                deleted_at: deleted.then_some(at),
            },
            author: AuthorSummary::unknown(author),
        }
    }

    #[test]
    fn thread_indents_replies_and_hides_deleted_bodies() {
        let root = comment(None, 0, true);
        let reply = comment(Some(root.comment.id), 1, false);
        let rendered = thread(&CommentThread::build(&[root, reply]));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("This comment has been deleted."));
        assert!(lines[1].starts_with("    ↳ "));
        assert!(lines[1].contains("hi there · ♥ 1"));
    }
}
