use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::model::{Channel, DestChannel, DestUser, NewChannel, NewUser, User};
use super::platform::{DestinationPlatform, PlatformError};
use super::translator::ReferenceLookup;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("source user {0} is unknown")]
    UnknownUser(String),
    #[error("channel {channel} has unresolved member {member}")]
    UnresolvedMember { channel: String, member: String },
    #[error("destination rejected {what}: {source}")]
    Destination {
        what: String,
        #[source]
        source: PlatformError,
    },
}

/// Run-scoped mapping between Slack and Mattermost identities.
///
/// Destination users are joined on email (case-insensitive), named channels on
/// their lowercased name. Missing entities are created on first use and the
/// creation response is cached immediately.
pub struct IdentityResolver {
    dest: Arc<dyn DestinationPlatform>,
    default_password: String,
    source_users: HashMap<String, User>,
    source_channels: HashMap<String, Channel>,
    users_by_email: HashMap<String, DestUser>,
    channels_by_name: HashMap<String, DestChannel>,
    user_ids: HashMap<String, Option<String>>,
    channel_ids: HashMap<String, String>,
    members: HashMap<String, HashSet<String>>,
    created_users: u64,
}

impl IdentityResolver {
    pub async fn load(
        dest: Arc<dyn DestinationPlatform>,
        default_password: impl Into<String>,
        source_users: Vec<User>,
        source_channels: Vec<Channel>,
    ) -> Result<Self, ResolveError> {
        let dest_users = dest
            .list_users()
            .await
            .map_err(|source| ResolveError::Destination {
                what: "user listing".to_string(),
                source,
            })?;
        let dest_channels =
            dest.list_channels()
                .await
                .map_err(|source| ResolveError::Destination {
                    what: "channel listing".to_string(),
                    source,
                })?;

        let mut users_by_email = HashMap::new();
        for user in dest_users {
            let email = user.email.trim().to_lowercase();
            if !email.is_empty() {
                users_by_email.entry(email).or_insert(user);
            }
        }
        let mut channels_by_name = HashMap::new();
        for channel in dest_channels {
            channels_by_name
                .entry(channel.name.to_lowercase())
                .or_insert(channel);
        }

        info!(
            source_users = source_users.len(),
            source_channels = source_channels.len(),
            destination_users = users_by_email.len(),
            destination_channels = channels_by_name.len(),
            "identity maps loaded"
        );

        Ok(Self {
            dest,
            default_password: default_password.into(),
            source_users: source_users
                .into_iter()
                .map(|user| (user.id.clone(), user))
                .collect(),
            source_channels: source_channels
                .into_iter()
                .map(|channel| (channel.id.clone(), channel))
                .collect(),
            users_by_email,
            channels_by_name,
            user_ids: HashMap::new(),
            channel_ids: HashMap::new(),
            members: HashMap::new(),
            created_users: 0,
        })
    }

    pub fn source_user(&self, source_id: &str) -> Option<&User> {
        self.source_users.get(source_id)
    }

    /// Destination accounts created so far in this run.
    pub fn created_users(&self) -> u64 {
        self.created_users
    }

    /// `Ok(None)` for bots and accounts without an email: they are never created
    /// as distinct people and their messages carry the raw identifier.
    pub async fn resolve_user(&mut self, source_id: &str) -> Result<Option<String>, ResolveError> {
        if let Some(cached) = self.user_ids.get(source_id) {
            return Ok(cached.clone());
        }

        let user = self
            .source_users
            .get(source_id)
            .ok_or_else(|| ResolveError::UnknownUser(source_id.to_string()))?;
        let Some(email) = user.normalized_email().filter(|_| !user.is_bot) else {
            debug!(user = source_id, "user is a bot or has no email, left unmapped");
            self.user_ids.insert(source_id.to_string(), None);
            return Ok(None);
        };

        if let Some(existing) = self.users_by_email.get(&email) {
            let id = existing.id.clone();
            self.user_ids.insert(source_id.to_string(), Some(id.clone()));
            return Ok(Some(id));
        }

        let spec = NewUser {
            username: destination_username(&user.name),
            email: email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            nickname: user.display_name.clone(),
            position: user.title.clone(),
            password: self.default_password.clone(),
        };
        let created =
            self.dest
                .create_user(&spec)
                .await
                .map_err(|source| ResolveError::Destination {
                    what: format!("user {}", spec.username),
                    source,
                })?;

        info!(user = source_id, username = %created.username, "destination user created");
        self.created_users += 1;
        let id = created.id.clone();
        self.users_by_email.insert(email, created);
        self.user_ids.insert(source_id.to_string(), Some(id.clone()));
        Ok(Some(id))
    }

    pub async fn resolve_channel(&mut self, channel: &Channel) -> Result<String, ResolveError> {
        if let Some(id) = self.channel_ids.get(&channel.id) {
            return Ok(id.clone());
        }

        let resolved = if channel.kind.is_named() {
            self.resolve_named_channel(channel).await?
        } else {
            self.resolve_conversation(channel).await?
        };

        self.channel_ids.insert(channel.id.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn resolve_named_channel(&mut self, channel: &Channel) -> Result<String, ResolveError> {
        let key = channel.name.to_lowercase();
        if let Some(existing) = self.channels_by_name.get(&key) {
            return Ok(existing.id.clone());
        }

        let spec = NewChannel {
            name: key.clone(),
            display_name: channel.name.clone(),
            kind: channel.kind,
            member_ids: Vec::new(),
        };
        let created = self
            .dest
            .create_channel(&spec)
            .await
            .map_err(|source| ResolveError::Destination {
                what: format!("channel {}", channel.name),
                source,
            })?;

        info!(channel = %channel.name, id = %created.id, "destination channel created");
        let id = created.id.clone();
        self.channels_by_name.insert(key, created);
        Ok(id)
    }

    async fn resolve_conversation(&mut self, channel: &Channel) -> Result<String, ResolveError> {
        let mut member_ids = Vec::with_capacity(channel.members.len());
        for member in &channel.members {
            match self.resolve_user(member).await {
                Ok(Some(id)) => member_ids.push(id),
                Ok(None) | Err(ResolveError::UnknownUser(_)) => {
                    return Err(ResolveError::UnresolvedMember {
                        channel: channel.name.clone(),
                        member: member.clone(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        member_ids.sort();
        member_ids.dedup();

        let spec = NewChannel {
            name: channel.name.clone(),
            display_name: channel.name.clone(),
            kind: channel.kind,
            member_ids: member_ids.clone(),
        };
        let created = self
            .dest
            .create_channel(&spec)
            .await
            .map_err(|source| ResolveError::Destination {
                what: format!("{} conversation {}", channel.kind.as_str(), channel.name),
                source,
            })?;

        self.members
            .insert(created.id.clone(), member_ids.into_iter().collect());
        Ok(created.id)
    }

    /// Adds the user to the destination channel unless already a member.
    /// Returns whether a membership was created.
    pub async fn ensure_member(
        &mut self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<bool, ResolveError> {
        if !self.members.contains_key(channel_id) {
            let loaded = self
                .dest
                .channel_members(channel_id)
                .await
                .map_err(|source| ResolveError::Destination {
                    what: format!("members of {channel_id}"),
                    source,
                })?;
            self.members
                .insert(channel_id.to_string(), loaded.into_iter().collect());
        }

        if self
            .members
            .get(channel_id)
            .is_some_and(|members| members.contains(user_id))
        {
            return Ok(false);
        }

        self.dest
            .add_member(channel_id, user_id)
            .await
            .map_err(|source| ResolveError::Destination {
                what: format!("membership of {user_id} in {channel_id}"),
                source,
            })?;
        self.members
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(true)
    }
}

impl ReferenceLookup for IdentityResolver {
    fn user_mention(&self, source_user_id: &str) -> Option<String> {
        let email = self.source_users.get(source_user_id)?.normalized_email()?;
        self.users_by_email
            .get(&email)
            .map(|user| user.username.clone())
    }

    fn channel_mention(&self, source_channel_id: &str) -> Option<String> {
        let channel = self
            .source_channels
            .get(source_channel_id)
            .filter(|channel| channel.kind.is_named())?;
        self.channels_by_name
            .get(&channel.name.to_lowercase())
            .map(|channel| channel.name.clone())
    }
}

/// Mattermost usernames are lowercase and limited to `a-z0-9._-`.
pub fn destination_username(name: &str) -> String {
    let mapped: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if mapped.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        mapped
    } else {
        format!("u{mapped}")
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::sync::model::ChannelKind;
    use crate::sync::testing::{FakeDestination, channel, user};

    async fn resolver(dest: &FakeDestination, users: Vec<User>, channels: Vec<Channel>) -> IdentityResolver {
        IdentityResolver::load(Arc::new(dest.clone()), "password1+", users, channels)
            .await
            .unwrap()
    }

    #[test_case("Alice Smith", "alice_smith")]
    #[test_case("bob.jones", "bob.jones")]
    #[test_case("42cats", "u42cats")]
    fn usernames_are_sanitized(input: &str, expected: &str) {
        assert_eq!(destination_username(input), expected);
    }

    #[tokio::test]
    async fn users_match_on_email_case_insensitively() {
        let dest = FakeDestination::default();
        dest.add_user("mm-alice", "alice", "Alice@Example.com");
        let mut resolver = resolver(
            &dest,
            vec![user("U1", "alice", Some("alice@example.COM"))],
            Vec::new(),
        )
        .await;

        assert_eq!(resolver.resolve_user("U1").await.unwrap().as_deref(), Some("mm-alice"));
        assert_eq!(dest.created_users(), 0);
    }

    #[tokio::test]
    async fn missing_users_are_created_once() {
        let dest = FakeDestination::default();
        let mut resolver = resolver(
            &dest,
            vec![user("U1", "carol", Some("carol@example.com"))],
            Vec::new(),
        )
        .await;

        let first = resolver.resolve_user("U1").await.unwrap();
        let second = resolver.resolve_user("U1").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(dest.created_users(), 1);
        assert_eq!(dest.user_password("carol").as_deref(), Some("password1+"));
    }

    #[tokio::test]
    async fn bots_and_email_less_users_stay_unmapped() {
        let dest = FakeDestination::default();
        let mut bot = user("B1", "deploybot", Some("bot@example.com"));
        bot.is_bot = true;
        let mut resolver = resolver(
            &dest,
            vec![bot, user("U2", "ghost", None)],
            Vec::new(),
        )
        .await;

        assert_eq!(resolver.resolve_user("B1").await.unwrap(), None);
        assert_eq!(resolver.resolve_user("U2").await.unwrap(), None);
        assert!(matches!(
            resolver.resolve_user("U404").await,
            Err(ResolveError::UnknownUser(_))
        ));
        assert_eq!(dest.created_users(), 0);
    }

    #[tokio::test]
    async fn named_channels_are_found_or_created() {
        let dest = FakeDestination::default();
        dest.add_channel("mm-general", "general");
        let general = channel("C1", "General", ChannelKind::Public, &[]);
        let secret = channel("C2", "secret", ChannelKind::Private, &[]);
        let mut resolver = resolver(&dest, Vec::new(), vec![general.clone(), secret.clone()]).await;

        assert_eq!(resolver.resolve_channel(&general).await.unwrap(), "mm-general");
        let created = resolver.resolve_channel(&secret).await.unwrap();
        assert_eq!(resolver.resolve_channel(&secret).await.unwrap(), created);
        assert_eq!(dest.created_channels(), vec![("secret".to_string(), "P".to_string())]);
    }

    #[tokio::test]
    async fn group_conversations_need_every_member() {
        let dest = FakeDestination::default();
        dest.add_user("mm-alice", "alice", "alice@example.com");
        let group = channel("G1", "mpdm-alice--ghost", ChannelKind::Group, &["U1", "U2"]);
        let mut resolver = resolver(
            &dest,
            vec![
                user("U1", "alice", Some("alice@example.com")),
                user("U2", "ghost", None),
            ],
            vec![group.clone()],
        )
        .await;

        let err = resolver.resolve_channel(&group).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvedMember { ref member, .. } if member == "U2"));
        assert!(dest.created_channels().is_empty());
    }

    #[tokio::test]
    async fn membership_is_added_once() {
        let dest = FakeDestination::default();
        dest.add_channel("mm-general", "general");
        dest.add_user("mm-alice", "alice", "alice@example.com");
        let mut resolver = resolver(&dest, Vec::new(), Vec::new()).await;

        assert!(resolver.ensure_member("mm-general", "mm-alice").await.unwrap());
        assert!(!resolver.ensure_member("mm-general", "mm-alice").await.unwrap());
        assert_eq!(dest.members("mm-general"), vec!["mm-alice".to_string()]);
    }

    #[tokio::test]
    async fn lookups_never_create() {
        let dest = FakeDestination::default();
        dest.add_user("mm-alice", "alice", "alice@example.com");
        let resolver = resolver(
            &dest,
            vec![user("U123", "alice", Some("alice@example.com"))],
            vec![channel("C456", "eng", ChannelKind::Public, &[])],
        )
        .await;

        assert_eq!(resolver.user_mention("U123").as_deref(), Some("alice"));
        assert_eq!(resolver.channel_mention("C456"), None);
        assert_eq!(dest.created_channels().len(), 0);
    }
}
