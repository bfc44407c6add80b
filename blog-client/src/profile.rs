use crate::error::BlogClientError;
use crate::model::{AuthorSummary, PostStat, Profile, ProfilePatch};
use crate::query::{Collection, Filter, Query};
use crate::session::SessionContext;
use crate::stats::ProfileStats;
use crate::validation::{validate_bio, validate_nickname};
use crate::{DataService, StorageApi, decode_one, decode_rows, encode};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const AVATAR_BUCKET: &str = "avatars";

/// Loads author summaries for `ids` in a single request. Ids without a
/// profile map to [`AuthorSummary::unknown`].
pub async fn load_authors<D: DataService + ?Sized>(
    data: &D,
    ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, AuthorSummary>, BlogClientError> {
    let ids: HashSet<Uuid> = ids.into_iter().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let query = Query::new(Collection::Profiles)
        .columns(&["id", "nickname", "avatar_url"])
        .filter(Filter::is_in("id", ids.iter()));
    let found: Vec<AuthorSummary> = decode_rows(data.select(&query).await?)?;
    let mut authors: HashMap<Uuid, AuthorSummary> =
        found.into_iter().map(|a| (a.id, a)).collect();
    for id in ids {
        authors.entry(id).or_insert_with(|| AuthorSummary::unknown(id));
    }
    Ok(authors)
}

pub(crate) fn author_for(authors: &HashMap<Uuid, AuthorSummary>, id: Uuid) -> AuthorSummary {
    authors
        .get(&id)
        .cloned()
        .unwrap_or_else(|| AuthorSummary::unknown(id))
}

#[derive(Clone)]
pub struct ProfileService<D: DataService + StorageApi + 'static> {
    data: Arc<D>,
    session: SessionContext,
}

impl<D> ProfileService<D>
where
    D: DataService + StorageApi + 'static,
{
    pub fn new(data: Arc<D>, session: SessionContext) -> Self {
        Self { data, session }
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<Profile, BlogClientError> {
        let query = Query::new(Collection::Profiles).filter(Filter::eq("id", user_id));
        decode_one(self.data.select(&query).await?)
    }

    pub async fn my_profile(&self) -> Result<Profile, BlogClientError> {
        let user = self.session.require_user()?;
        self.get_profile(user).await
    }

    #[instrument(skip(self))]
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile, BlogClientError> {
        let user = self.session.require_user()?;
        let mut patch = patch;
        if let Some(nickname) = patch.nickname.as_mut() {
            validate_nickname(nickname)?;
            *nickname = nickname.trim().to_string();
        }
        if let Some(bio) = patch.bio.as_ref() {
            validate_bio(bio)?;
        }
        let rows = self
            .data
            .update(
                Collection::Profiles,
                encode(&patch)?,
                vec![Filter::eq("id", user)],
            )
            .await?;
        let profile: Profile = decode_one(rows)?;
        info!(user_id = %user, "profile updated");
        Ok(profile)
    }

    /// Stores the image and points the profile at it.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_avatar(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Profile, BlogClientError> {
        let user = self.session.require_user()?;
        let path = object_path(user, file_name);
        let url = self
            .data
            .upload(AVATAR_BUCKET, &path, bytes, content_type)
            .await?;
        self.update_profile(ProfilePatch {
            avatar_url: Some(url),
            ..ProfilePatch::default()
        })
        .await
    }

    /// Post count and likes received, recomputed from scratch.
    pub async fn stats(&self, user_id: Uuid) -> Result<ProfileStats, BlogClientError> {
        let query = Query::new(Collection::Posts)
            .columns(&["id", "like_count"])
            .filter(Filter::eq("author_id", user_id));
        let posts: Vec<PostStat> = decode_rows(self.data.select(&query).await?)?;
        Ok(ProfileStats::from_posts(&posts))
    }
}

/// `<user id>/<random>.<ext>`; objects are always namespaced by owner.
pub(crate) fn object_path(user: Uuid, file_name: &str) -> String {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{user}/{}.{ext}", Uuid::new_v4()),
        None => format!("{user}/{}", Uuid::new_v4()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::model::ProfileSeed;
    use crate::session::SessionManager;
    use crate::store::ClientStore;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryBackend>, ProfileService<MemoryBackend>, Uuid) {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionManager::new(backend.clone(), Arc::new(ClientStore::in_memory()));
        let session = manager
            .sign_up("a@b.c", "secret1", ProfileSeed { nickname: "alice".into() })
            .await
            .unwrap();
        let service = ProfileService::new(backend.clone(), manager.context());
        (backend, service, session.user.id)
    }

    #[tokio::test]
    async fn stats_sum_likes_over_all_posts() {
        let (backend, service, user) = setup().await;
        let mut ids = Vec::new();
        for (title, public) in [("one", true), ("two", false)] {
            let rows = backend
                .insert(
                    Collection::Posts,
                    vec![json!({ "author_id": user, "title": title, "content": "c", "is_public": public })],
                )
                .await
                .unwrap();
            ids.push(rows[0]["id"].clone());
        }
        for id in &ids {
            backend
                .insert(Collection::Likes, vec![json!({ "user_id": user, "post_id": id })])
                .await
                .unwrap();
        }

        let stats = service.stats(user).await.unwrap();
        assert_eq!(stats.post_count, 2);
        assert_eq!(stats.total_likes, 2);
    }

    #[tokio::test]
    async fn update_profile_validates_before_sending() {
        let (_, service, _) = setup().await;
        let err = service
            .update_profile(ProfilePatch {
                bio: Some("x".repeat(201)),
                ..ProfilePatch::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BlogClientError::Validation(_)));

        let profile = service
            .update_profile(ProfilePatch {
                nickname: Some("  alicia ".into()),
                show_email: Some(true),
                ..ProfilePatch::default()
            })
            .await
            .unwrap();
        assert_eq!(profile.nickname, "alicia");
        assert!(profile.show_email);
    }

    #[tokio::test]
    async fn avatar_upload_updates_profile() {
        let (backend, service, user) = setup().await;
        let profile = service
            .upload_avatar("Me.PNG", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        let url = profile.avatar_url.unwrap();
        assert!(url.starts_with(&format!("memory://avatars/{user}/")));
        assert!(url.ends_with(".png"));
        let path = url.trim_start_matches("memory://avatars/");
        assert_eq!(backend.object(AVATAR_BUCKET, path).await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn missing_profiles_fall_back_to_placeholder() {
        let (backend, _, user) = setup().await;
        let ghost = Uuid::new_v4();
        let authors = load_authors(backend.as_ref(), [user, ghost]).await.unwrap();
        assert_eq!(authors[&user].nickname, "alice");
        assert_eq!(authors[&ghost].nickname, crate::model::UNKNOWN_AUTHOR);
        assert_eq!(authors[&ghost].avatar_url, None);
    }

    #[test]
    fn object_paths_are_owner_scoped() {
        let user = Uuid::new_v4();
        let path = object_path(user, "photo.JPG");
        assert!(path.starts_with(&format!("{user}/")));
        assert!(path.ends_with(".jpg"));
        assert!(!object_path(user, "noext").contains('.'));
        assert!(!object_path(user, "../../etc/passwd").contains(".."));
    }
}
