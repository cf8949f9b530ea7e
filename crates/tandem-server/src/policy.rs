//! Config-driven [`AccessChecker`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tandem_core::{AccessChecker, AccessError, Identity};

use crate::config::AccessConfig;

const WILDCARD: &str = "*";

/// Per-document allow lists with an open or closed default.
///
/// A listed document admits only the users on its list (`"*"` admits every
/// authenticated user). An unlisted document is admitted when the policy is
/// open and reported as not found otherwise.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    open: bool,
    documents: HashMap<String, HashSet<String>>,
}

impl AccessPolicy {
    /// Build from the `[access]` config section.
    #[must_use]
    pub fn from_config(config: &AccessConfig) -> Self {
        let policy = Self {
            open: config.open,
            documents: HashMap::new(),
        };
        config
            .documents
            .iter()
            .fold(policy, |policy, (doc, users)| policy.allow(doc.clone(), users.iter().cloned()))
    }

    /// Allow `users` into `document_id`.
    #[must_use]
    pub fn allow<I, S>(mut self, document_id: impl Into<String>, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents
            .entry(document_id.into())
            .or_default()
            .extend(users.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl AccessChecker for AccessPolicy {
    async fn check_access(&self, identity: &Identity, document_id: &str) -> Result<(), AccessError> {
        match self.documents.get(document_id) {
            Some(users) if users.contains(WILDCARD) || users.contains(&identity.user_id) => Ok(()),
            Some(_) => Err(AccessError::Denied(document_id.to_string())),
            None if self.open => Ok(()),
            None => Err(AccessError::NotFound(document_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_policy() -> AccessPolicy {
        AccessPolicy::from_config(&AccessConfig::default())
    }

    fn alice() -> Identity {
        Identity::new("alice", "alice@example.com")
    }

    #[tokio::test]
    async fn test_open_policy_admits_unlisted() {
        let policy = open_policy();
        assert!(policy.check_access(&alice(), "anything").await.is_ok());
    }

    #[tokio::test]
    async fn test_listed_document_requires_membership() {
        let policy = open_policy().allow("roadmap", ["bob"]);

        assert!(matches!(
            policy.check_access(&alice(), "roadmap").await,
            Err(AccessError::Denied(doc)) if doc == "roadmap"
        ));
        assert!(policy
            .check_access(&Identity::new("bob", "bob"), "roadmap")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wildcard_admits_everyone() {
        let policy = AccessPolicy::default().allow("lobby", ["*"]);
        assert!(policy.check_access(&alice(), "lobby").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_policy_reports_unknown_documents() {
        let config = AccessConfig {
            open: false,
            documents: HashMap::from([("roadmap".to_string(), vec!["alice".to_string()])]),
        };
        let policy = AccessPolicy::from_config(&config);

        assert!(policy.check_access(&alice(), "roadmap").await.is_ok());
        assert!(matches!(
            policy.check_access(&alice(), "secret").await,
            Err(AccessError::NotFound(_))
        ));
    }
}
