use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::counter::RunCounter;
use super::model::{DestUser, User, UserPatch};
use super::platform::{DestinationPlatform, PlatformError, SourcePlatform};
use crate::media::filename_from_url;

const MAX_AVATAR_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Default, Clone)]
pub struct ProfileSyncOptions {
    /// Restrict the sync to these emails (lowercased). Empty means everyone.
    pub emails: HashSet<String>,
    pub images: bool,
}

impl ProfileSyncOptions {
    fn includes(&self, email: &str) -> bool {
        self.emails.is_empty() || self.emails.contains(email)
    }
}

/// Copies Slack profile fields onto the matching Mattermost accounts.
pub struct UserProfileSync<'a> {
    source: &'a dyn SourcePlatform,
    dest: &'a dyn DestinationPlatform,
    counter: &'a RunCounter,
}

impl<'a> UserProfileSync<'a> {
    pub fn new(
        source: &'a dyn SourcePlatform,
        dest: &'a dyn DestinationPlatform,
        counter: &'a RunCounter,
    ) -> Self {
        Self {
            source,
            dest,
            counter,
        }
    }

    pub async fn run(
        &self,
        source_users: &[User],
        options: &ProfileSyncOptions,
    ) -> Result<(), PlatformError> {
        let dest_users: HashMap<String, DestUser> = self
            .dest
            .list_users()
            .await?
            .into_iter()
            .filter(|user| !user.email.trim().is_empty())
            .map(|user| (user.email.trim().to_lowercase(), user))
            .collect();

        for user in source_users {
            if user.is_bot {
                continue;
            }
            let Some(email) = user.normalized_email() else {
                continue;
            };
            if !options.includes(&email) {
                continue;
            }
            let Some(existing) = dest_users.get(&email) else {
                debug!(user = %user.name, "no destination account, profile not synced");
                continue;
            };

            let patch = profile_patch(user, existing);
            if !patch.is_empty() {
                match self.dest.update_user(&existing.id, &patch).await {
                    Ok(_) => {
                        info!(user = %user.name, "profile updated");
                        self.counter.updated();
                    }
                    Err(err) => {
                        warn!(user = %user.name, "profile update failed: {err}");
                        self.counter.error();
                    }
                }
            }

            if options.images
                && let Some(avatar) = user.avatar_url.as_deref()
            {
                self.copy_avatar(user, existing, avatar).await;
            }
        }
        Ok(())
    }

    async fn copy_avatar(&self, user: &User, existing: &DestUser, avatar_url: &str) {
        let bytes = match self.source.download_file(avatar_url, MAX_AVATAR_BYTES).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(user = %user.name, "avatar download failed: {err}");
                self.counter.error();
                return;
            }
        };
        let file_name = filename_from_url(avatar_url).unwrap_or_else(|| "avatar.png".to_string());
        match self
            .dest
            .set_profile_image(&existing.id, &file_name, bytes)
            .await
        {
            Ok(()) => debug!(user = %user.name, "avatar copied"),
            Err(err) => {
                warn!(user = %user.name, "avatar upload failed: {err}");
                self.counter.error();
            }
        }
    }
}

/// Only fields that differ are sent.
pub fn profile_patch(source: &User, existing: &DestUser) -> UserPatch {
    fn changed(wanted: &str, current: &str) -> Option<String> {
        let wanted = wanted.trim();
        (!wanted.is_empty() && wanted != current.trim()).then(|| wanted.to_string())
    }

    UserPatch {
        first_name: changed(&source.first_name, &existing.first_name),
        last_name: changed(&source.last_name, &existing.last_name),
        nickname: changed(&source.display_name, &existing.nickname),
        position: changed(&source.title, &existing.position),
    }
}
