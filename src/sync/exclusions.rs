use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::db::{DatabaseError, ExclusionKind, ExclusionStore};

/// Result of applying a `+name -name` token list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExclusionChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

pub struct ExclusionService {
    store: Arc<dyn ExclusionStore>,
}

impl ExclusionService {
    pub fn new(store: Arc<dyn ExclusionStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, kind: ExclusionKind) -> Result<Vec<String>, DatabaseError> {
        self.store.list_exclusions(kind).await
    }

    /// `+name` adds, `-name` removes, a bare name adds. Separators are whitespace or commas.
    pub async fn apply_tokens(
        &self,
        kind: ExclusionKind,
        tokens: &str,
    ) -> Result<ExclusionChange, DatabaseError> {
        let mut change = ExclusionChange::default();
        for token in tokens
            .split(|c: char| c.is_whitespace() || c == ',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            if let Some(name) = token.strip_prefix('-') {
                let name = name.trim();
                if !name.is_empty() && self.store.remove_exclusion(kind, name).await? {
                    change.removed.push(name.to_string());
                }
            } else {
                let name = token.strip_prefix('+').unwrap_or(token).trim();
                if !name.is_empty() && self.store.add_exclusion(kind, name).await? {
                    change.added.push(name.to_string());
                }
            }
        }

        info!(
            kind = kind.as_str(),
            added = change.added.len(),
            removed = change.removed.len(),
            "exclusions updated"
        );
        Ok(change)
    }

    pub async fn snapshot(&self) -> Result<ExclusionSet, DatabaseError> {
        Ok(ExclusionSet {
            channels: self
                .store
                .list_exclusions(ExclusionKind::Channel)
                .await?
                .into_iter()
                .collect(),
            users: self
                .store
                .list_exclusions(ExclusionKind::User)
                .await?
                .into_iter()
                .collect(),
        })
    }
}

/// Exclusions loaded once at the start of a run.
#[derive(Debug, Default, Clone)]
pub struct ExclusionSet {
    channels: HashSet<String>,
    users: HashSet<String>,
}

impl ExclusionSet {
    pub fn is_allowed_channel(&self, name: &str) -> bool {
        !self.channels.contains(name)
    }

    pub fn is_allowed_user(&self, name: &str) -> bool {
        !self.users.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MemoryExclusionStore;

    #[tokio::test]
    async fn tokens_add_and_remove() {
        let service = ExclusionService::new(Arc::new(MemoryExclusionStore::default()));

        let change = service
            .apply_tokens(ExclusionKind::Channel, "+random, general +random")
            .await
            .unwrap();
        assert_eq!(change.added, vec!["random".to_string(), "general".to_string()]);

        let change = service
            .apply_tokens(ExclusionKind::Channel, "-general -missing")
            .await
            .unwrap();
        assert_eq!(change.removed, vec!["general".to_string()]);
        assert!(change.added.is_empty());

        let set = service.snapshot().await.unwrap();
        assert!(!set.is_allowed_channel("random"));
        assert!(set.is_allowed_channel("general"));
        assert!(set.is_allowed_user("random"));
    }

    #[test]
    fn user_exclusions_are_separate_from_channels() {
        tokio_test::block_on(async {
            let service = ExclusionService::new(Arc::new(MemoryExclusionStore::default()));
            service
                .apply_tokens(ExclusionKind::User, "bob")
                .await
                .unwrap();

            assert_eq!(service.list(ExclusionKind::User).await.unwrap(), vec!["bob".to_string()]);
            assert!(service.list(ExclusionKind::Channel).await.unwrap().is_empty());
            let set = service.snapshot().await.unwrap();
            assert!(!set.is_allowed_user("bob"));
            assert!(set.is_allowed_channel("bob"));
        });
    }
}
