//! Token-to-identity resolution.

use std::collections::HashMap;

use atrium_protocol::UserId;

use crate::SessionError;

/// Resolves a bearer token into a durable user identity.
///
/// Resolution is opportunistic at the call site: a join without a token
/// never reaches the authenticator, and an [`SessionError::AuthFailed`]
/// downgrades the peer to a guest instead of rejecting the join.
pub trait Authenticator: Send + Sync + 'static {
    fn identify(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<UserId, SessionError>> + Send;
}

/// Fixed token table, used by tests and single-tenant deployments.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        self.tokens.insert(token.into(), UserId(user.into()));
        self
    }
}

impl Authenticator for StaticAuthenticator {
    async fn identify(&self, token: &str) -> Result<UserId, SessionError> {
        self.tokens.get(token).cloned().ok_or_else(|| {
            SessionError::AuthFailed("unknown token".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identify_known_token_resolves_user() {
        let auth = StaticAuthenticator::new().with_token("tok-1", "alice");
        let user = auth.identify("tok-1").await.unwrap();
        assert_eq!(user, UserId("alice".into()));
    }

    #[tokio::test]
    async fn test_identify_unknown_token_fails() {
        let auth = StaticAuthenticator::new();
        assert!(matches!(
            auth.identify("nope").await,
            Err(SessionError::AuthFailed(_))
        ));
    }
}
