//! User context loading

use std::sync::Arc;

use cadenza_store::Profile;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::stores::ProfileStore;

/// Loads the profile snapshot a conversation starts from
pub struct UserContextLoader {
    profiles: Arc<dyn ProfileStore>,
}

impl UserContextLoader {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    /// Fails with `ProfileNotFound` when the id does not resolve
    pub async fn load(&self, user_id: i64) -> Result<Profile, DispatchError> {
        match self.profiles.get(user_id).await? {
            Some(profile) => {
                debug!("Loaded profile for customer {}", user_id);
                Ok(profile)
            }
            None => {
                warn!("No profile for customer {}", user_id);
                Err(DispatchError::ProfileNotFound(user_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_store::MusicStoreDb;

    #[tokio::test]
    async fn test_load_known_and_unknown_user() {
        let db = Arc::new(MusicStoreDb::open_in_memory().unwrap());
        db.insert_customer(&Profile::new(7, "Grace", "Hopper", "grace@example.com"))
            .await
            .unwrap();
        let loader = UserContextLoader::new(db);

        let profile = loader.load(7).await.unwrap();
        assert_eq!(profile.first_name, "Grace");

        let err = loader.load(8).await.unwrap_err();
        assert!(matches!(err, DispatchError::ProfileNotFound(8)));
    }
}
