mod render;

use anyhow::{Context, anyhow, bail};
use blog_client::comments::{CommentService, CommentThread};
use blog_client::feed::{FeedService, SortMode};
use blog_client::likes::LikeService;
use blog_client::model::{PostPatch, ProfilePatch, ProfileSeed};
use blog_client::pager::{LoadOutcome, PageSource, Pager};
use blog_client::posts::{PostDraft, PostService};
use blog_client::profile::ProfileService;
use blog_client::search::RecentSearches;
use blog_client::session::SessionManager;
use blog_client::store::ClientStore;
use blog_client::validation::parse_tags;
use blog_client::{BlogClientError, BlogClientHttp, PostView};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "blog", about = "Read and write the blog from the terminal")]
struct Cli {
    #[arg(long, env = "BLOG_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Where recent searches and a remembered session are kept.
    #[arg(long, env = "BLOG_STATE_DIR", default_value = ".blog")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BLOG_PASSWORD")]
        password: String,
        #[arg(long)]
        nickname: String,
        #[arg(long)]
        remember: bool,
    },
    /// Without --remember the session ends with this command.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BLOG_PASSWORD")]
        password: String,
        #[arg(long)]
        remember: bool,
    },
    Logout,
    Whoami,
    Feed {
        #[arg(long, default_value_t = SortMode::Latest)]
        sort: SortMode,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Show a post by id or slug, with its comments.
    Show {
        post: String,
        #[arg(long, default_value_t = 1)]
        comment_pages: usize,
    },
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    Recent {
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        remove: Option<String>,
    },
    Write {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        /// Comma separated, e.g. "rust,async".
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        private: bool,
        #[arg(long)]
        thumbnail: Option<PathBuf>,
    },
    Edit {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        public: Option<bool>,
        #[arg(long)]
        thumbnail: Option<PathBuf>,
    },
    Delete {
        id: Uuid,
    },
    Comment {
        post: Uuid,
        body: String,
    },
    Reply {
        post: Uuid,
        parent: Uuid,
        body: String,
    },
    EditComment {
        id: Uuid,
        body: String,
    },
    DeleteComment {
        id: Uuid,
    },
    Like {
        post: Uuid,
    },
    LikeComment {
        comment: Uuid,
    },
    Profile {
        #[arg(long)]
        user: Option<Uuid>,
    },
    EditProfile {
        #[arg(long)]
        nickname: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        show_email: Option<bool>,
        #[arg(long)]
        avatar: Option<PathBuf>,
    },
}

struct App {
    backend: Arc<BlogClientHttp>,
    store: Arc<ClientStore>,
    sessions: SessionManager<BlogClientHttp, ClientStore>,
}

impl App {
    async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let backend = Arc::new(BlogClientHttp::connect(&cli.server)?);
        let store = Arc::new(ClientStore::open(&cli.state_dir));
        let sessions = SessionManager::new(backend.clone(), store.clone());
        if let Some(session) = sessions.restore().await {
            debug!(user_id = %session.user.id, "restored session");
        }
        Ok(Self {
            backend,
            store,
            sessions,
        })
    }

    fn posts(&self) -> PostService<BlogClientHttp> {
        PostService::new(self.backend.clone(), self.sessions.context())
    }

    fn comments(&self) -> CommentService<BlogClientHttp> {
        CommentService::new(self.backend.clone(), self.sessions.context())
    }

    fn likes(&self) -> LikeService<BlogClientHttp> {
        LikeService::new(self.backend.clone(), self.sessions.context())
    }

    fn profiles(&self) -> ProfileService<BlogClientHttp> {
        ProfileService::new(self.backend.clone(), self.sessions.context())
    }

    fn feed(&self) -> FeedService<BlogClientHttp> {
        FeedService::new(self.backend.clone())
    }

    fn recent(&self) -> RecentSearches<ClientStore> {
        RecentSearches::new(self.store.clone())
    }

    async fn resolve_post(&self, reference: &str) -> anyhow::Result<PostView> {
        let posts = self.posts();
        let post = match Uuid::parse_str(reference) {
            Ok(id) => posts.get_post(id).await,
            Err(_) => posts.get_post_by_slug(reference).await,
        };
        post.map_err(|err| match err {
            BlogClientError::NotFound => anyhow!("no post matches {reference}"),
            other => other.into(),
        })
    }
}

/// Loads up to `pages` pages, stopping early once the source runs dry.
async fn load_pages<S: PageSource>(pager: &Pager<S>, pages: usize) -> anyhow::Result<Vec<S::Item>> {
    for _ in 0..pages.max(1) {
        if let LoadOutcome::Exhausted = pager.load_next().await? {
            break;
        }
    }
    Ok(pager.items().await)
}

fn read_upload(path: &Path) -> anyhow::Result<(String, Vec<u8>, String)> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    Ok((name, bytes, content_type))
}

fn tags(input: Option<&str>) -> anyhow::Result<Option<Vec<String>>> {
    input
        .map(|raw| parse_tags(raw).map_err(anyhow::Error::from))
        .transpose()
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = App::open(&cli).await?;

    match cli.command {
        Command::Signup {
            email,
            password,
            nickname,
            remember,
        } => {
            app.sessions.set_remember_me(remember)?;
            let session = app
                .sessions
                .sign_up(&email, &password, ProfileSeed { nickname })
                .await?;
            println!("Welcome! Signed up as {}", session.user.email);
        }
        Command::Login {
            email,
            password,
            remember,
        } => {
            let session = app.sessions.sign_in(&email, &password, remember).await?;
            println!("Signed in as {}", session.user.email);
            if !remember {
                println!("Session not kept; use --remember to stay signed in.");
            }
        }
        Command::Logout => {
            app.sessions.sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => match app.sessions.context().current() {
            Some(session) => {
                let session = app.sessions.refresh().await.unwrap_or(session);
                println!("{} ({})", session.user.email, session.user.id);
            }
            None => println!("Not signed in"),
        },
        Command::Feed { sort, pages } => {
            let pager = app.feed().pager(sort);
            let posts = load_pages(&pager, pages).await?;
            println!("{sort} posts ({})", posts.len());
            for view in &posts {
                println!("{}", render::post_line(view));
            }
            pager.close().await;
        }
        Command::Show {
            post,
            comment_pages,
        } => {
            let view = app.resolve_post(&post).await?;
            let like = app
                .likes()
                .post_like_state(view.post.id, view.post.like_count)
                .await?;
            println!("{}", render::post_detail(&view, &like));

            let pager = app.comments().pager(view.post.id);
            let comments = load_pages(&pager, comment_pages).await?;
            let thread = CommentThread::build(&comments);
            println!();
            print!("{}", render::thread(&thread));
            if !pager.is_exhausted().await {
                println!("(more comments: --comment-pages {})", comment_pages + 1);
            }
        }
        Command::Search { query, pages } => {
            let pager = app.feed().search_pager(&query)?;
            let results = load_pages(&pager, pages).await?;
            if let Err(err) = app.recent().record(&query) {
                debug!(error = %err, "recent search not recorded");
            }
            println!("{} result(s) for \"{}\"", results.len(), query.trim());
            for view in &results {
                println!("{}", render::search_result(view, query.trim()));
            }
        }
        Command::Recent { clear, remove } => {
            let recent = app.recent();
            if clear {
                recent.clear()?;
                println!("Recent searches cleared");
            } else {
                let terms = match remove {
                    Some(term) => recent.remove(&term)?,
                    None => recent.list(),
                };
                for term in terms {
                    println!("{term}");
                }
            }
        }
        Command::Write {
            title,
            content,
            tags: raw_tags,
            private,
            thumbnail,
        } => {
            let posts = app.posts();
            let thumbnail_url = match thumbnail {
                Some(path) => {
                    let (name, bytes, content_type) = read_upload(&path)?;
                    Some(posts.upload_thumbnail(&name, bytes, &content_type).await?)
                }
                None => None,
            };
            let view = posts
                .create_post(PostDraft {
                    title,
                    content,
                    tags: tags(raw_tags.as_deref())?.unwrap_or_default(),
                    is_public: !private,
                    thumbnail_url,
                })
                .await?;
            println!("Post created: {}", render::post_line(&view));
        }
        Command::Edit {
            id,
            title,
            content,
            tags: raw_tags,
            public,
            thumbnail,
        } => {
            let posts = app.posts();
            let thumbnail_url = match thumbnail {
                Some(path) => {
                    let (name, bytes, content_type) = read_upload(&path)?;
                    Some(posts.upload_thumbnail(&name, bytes, &content_type).await?)
                }
                None => None,
            };
            let view = posts
                .update_post(
                    id,
                    PostPatch {
                        title,
                        content,
                        thumbnail_url,
                        tags: tags(raw_tags.as_deref())?,
                        is_public: public,
                    },
                )
                .await?;
            println!("Post updated: {}", render::post_line(&view));
        }
        Command::Delete { id } => {
            app.posts().delete_post(id).await?;
            println!("Post deleted");
        }
        Command::Comment { post, body } => {
            let view = app.comments().add_comment(post, &body).await?;
            println!("Comment added: {}", view.comment.id);
        }
        Command::Reply { post, parent, body } => {
            let view = app.comments().add_reply(post, parent, &body).await?;
            println!("Reply added: {}", view.comment.id);
        }
        Command::EditComment { id, body } => {
            app.comments().edit_comment(id, &body).await?;
            println!("Comment updated");
        }
        Command::DeleteComment { id } => {
            app.comments().delete_comment(id).await?;
            println!("Comment deleted");
        }
        Command::Like { post } => {
            let view = app.posts().get_post(post).await?;
            let likes = app.likes();
            let mut state = likes.post_like_state(post, view.post.like_count).await?;
            likes.toggle_post_like(&mut state).await?;
            println!("{}", render::like_line(&state));
        }
        Command::LikeComment { comment } => {
            let current = app.comments().get_comment(comment).await?;
            let likes = app.likes();
            let mut state = likes
                .comment_like_state(comment, current.like_count)
                .await?;
            likes.toggle_comment_like(&mut state).await?;
            println!("{}", render::like_line(&state));
        }
        Command::Profile { user } => {
            let ctx = app.sessions.context();
            let me = ctx.current();
            let user = match (user, &me) {
                (Some(user), _) => user,
                (None, Some(session)) => session.user.id,
                (None, None) => bail!("not signed in; pass --user or log in first"),
            };
            let profiles = app.profiles();
            let profile = profiles.get_profile(user).await?;
            let stats = profiles.stats(user).await?;
            let email = me
                .as_ref()
                .filter(|s| s.user.id == user)
                .map(|s| s.user.email.as_str());
            println!("{}", render::profile(&profile, email, &stats));

            let posts = app.posts().list_by_author(user, 0, 20).await?;
            for view in &posts {
                println!("{}", render::post_line(view));
            }
        }
        Command::EditProfile {
            nickname,
            bio,
            show_email,
            avatar,
        } => {
            let profiles = app.profiles();
            if let Some(path) = avatar {
                let (name, bytes, content_type) = read_upload(&path)?;
                profiles.upload_avatar(&name, bytes, &content_type).await?;
            }
            let patch = ProfilePatch {
                nickname,
                bio,
                avatar_url: None,
                show_email,
            };
            let profile = if patch.nickname.is_none() && patch.bio.is_none() && patch.show_email.is_none() {
                profiles.my_profile().await?
            } else {
                profiles.update_profile(patch).await?
            };
            println!("Profile saved: {}", profile.nickname);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    if let Err(err) = run(Cli::parse()).await {
        if let Some(BlogClientError::Unauthorized) = err.downcast_ref::<BlogClientError>() {
            eprintln!("Error: not signed in (run `blog login --remember`)");
        } else {
            eprintln!("Error: {err}");
        }
        std::process::exit(1);
    }
}
