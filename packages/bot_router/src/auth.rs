//! Request authorization
//!
//! A request for a bot is allowed if it carries the shared token, or if the
//! bot already has a live bridge. The first access to a bot therefore needs
//! the token; later accesses to the same warm bot do not.

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::debug;

use crate::registry::InstanceRegistry;

const GENERATED_TOKEN_LEN: usize = 32;

/// Random alphanumeric token used when none is configured
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    /// The shared token matched
    Token,
    /// No matching token, but the bot already has a live bridge
    WarmSession,
    Denied,
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AuthDecision::Denied)
    }
}

#[derive(Clone, Debug)]
pub struct AuthGate {
    token: String,
}

impl AuthGate {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn authorize(
        &self,
        bot_name: &str,
        provided: Option<&str>,
        registry: &InstanceRegistry,
    ) -> AuthDecision {
        if provided == Some(self.token.as_str()) {
            return AuthDecision::Token;
        }
        if registry.is_live(bot_name).await {
            debug!("Allowing tokenless request for live bot {}", bot_name);
            return AuthDecision::WarmSession;
        }
        AuthDecision::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::BridgeLauncher;
    use bridge_supervisor::BridgeSupervisor;

    fn registry(base_port: u16) -> InstanceRegistry {
        InstanceRegistry::new(
            BridgeSupervisor::new(base_port),
            BridgeLauncher::new("sleep", vec!["30".to_string()], "/tmp/tmux-test/default"),
        )
    }

    #[test]
    fn test_generated_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), GENERATED_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_correct_token_allows_cold_bot() {
        let gate = AuthGate::new("s3cret");
        let reg = registry(16000);
        assert_eq!(
            gate.authorize("alice", Some("s3cret"), &reg).await,
            AuthDecision::Token
        );
    }

    #[tokio::test]
    async fn test_missing_or_wrong_token_denied_for_cold_bot() {
        let gate = AuthGate::new("s3cret");
        let reg = registry(16100);
        for provided in [None, Some(""), Some("wrong"), Some("S3CRET"), Some("s3cret ")] {
            let decision = gate.authorize("alice", provided, &reg).await;
            assert_eq!(decision, AuthDecision::Denied, "{:?}", provided);
            assert!(!decision.is_allowed());
        }
    }

    #[tokio::test]
    async fn test_live_bot_allowed_without_token() {
        let gate = AuthGate::new("s3cret");
        let reg = registry(16200);
        reg.ensure("alice", "win1").await.unwrap();

        assert_eq!(
            gate.authorize("alice", None, &reg).await,
            AuthDecision::WarmSession
        );
        assert_eq!(
            gate.authorize("alice", Some("wrong"), &reg).await,
            AuthDecision::WarmSession
        );
        // Other bots stay locked
        assert_eq!(gate.authorize("bob", None, &reg).await, AuthDecision::Denied);

        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_exited_bot_requires_token_again() {
        let gate = AuthGate::new("s3cret");
        let reg = InstanceRegistry::new(
            BridgeSupervisor::new(16300),
            BridgeLauncher::new("true", Vec::new(), "/tmp/tmux-test/default"),
        );
        reg.ensure("alice", "win1").await.unwrap();
        reg.get("alice").await.unwrap().handle().exited().await;

        assert_eq!(gate.authorize("alice", None, &reg).await, AuthDecision::Denied);
    }
}
