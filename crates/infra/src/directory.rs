use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use rapport_domain::DomainResult;
use rapport_domain::ports::BoxFuture;
use rapport_domain::ports::users::UserDirectory;
use rapport_domain::users::{ContactDetails, GeoPoint, UserProfile};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Fixture shape: `{"users": [{..profile, "email", "phone"}], "blocks": [["a", "b"]]}`.
#[derive(Debug, Default, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub blocks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Default)]
struct DirectoryTables {
    users: HashMap<String, UserProfile>,
    contacts: HashMap<String, ContactDetails>,
    /// (blocker, blocked)
    blocks: HashSet<(String, String)>,
}

#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    tables: Arc<RwLock<DirectoryTables>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed(seed: DirectorySeed) -> Self {
        let directory = Self::new();
        for user in seed.users {
            let contact = ContactDetails {
                email: user.email,
                phone: user.phone,
            };
            directory.upsert_user(user.profile, contact).await;
        }
        for (blocker, blocked) in seed.blocks {
            directory.block(&blocker, &blocked).await;
        }
        directory
    }

    pub async fn load_seed_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: DirectorySeed = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            users = seed.users.len(),
            blocks = seed.blocks.len(),
            "user directory seeded"
        );
        Ok(Self::from_seed(seed).await)
    }

    pub async fn upsert_user(&self, mut profile: UserProfile, contact: ContactDetails) {
        profile.location = profile
            .location
            .map(|point| GeoPoint::coarsened(point.lat, point.lng));
        let mut tables = self.tables.write().await;
        tables.contacts.insert(profile.user_id.clone(), contact);
        tables.users.insert(profile.user_id.clone(), profile);
    }

    pub async fn block(&self, blocker_id: &str, blocked_id: &str) {
        self.tables
            .write()
            .await
            .blocks
            .insert((blocker_id.to_string(), blocked_id.to_string()));
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let user_id = user_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.users.get(&user_id).cloned()) })
    }

    fn list_active_users(&self) -> BoxFuture<'_, DomainResult<Vec<UserProfile>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .users
                .values()
                .filter(|user| user.is_active())
                .cloned()
                .collect())
        })
    }

    fn blocked_user_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<HashSet<String>>> {
        let user_id = user_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .blocks
                .iter()
                .filter_map(|(blocker, blocked)| {
                    if *blocker == user_id {
                        Some(blocked.clone())
                    } else if *blocked == user_id {
                        Some(blocker.clone())
                    } else {
                        None
                    }
                })
                .collect())
        })
    }

    fn contact_details(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ContactDetails>>> {
        let user_id = user_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.contacts.get(&user_id).cloned()) })
    }
}
