//! Handshake authentication hooks.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::handshake::HandshakeRequest;

/// Rejection from an [`AuthHook`].
///
/// Unset fields fall back to 401 / "Invalid token".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthError {
    /// HTTP status code.
    pub code: Option<u16>,
    /// Response body.
    pub message: Option<String>,
}

impl AuthError {
    /// Default status.
    pub const DEFAULT_CODE: u16 = 401;
    /// Default body.
    pub const DEFAULT_MESSAGE: &'static str = "Invalid token";

    /// Rejection with a message and the default code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
        }
    }

    /// Override the status code.
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Effective status code.
    pub fn code(&self) -> u16 {
        self.code.unwrap_or(Self::DEFAULT_CODE)
    }

    /// Effective message.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(Self::DEFAULT_MESSAGE)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthError {}

/// Decides whether a handshake may proceed.
///
/// The returned value is attached to the connection as its `user`.
#[async_trait]
pub trait AuthHook: Send + Sync {
    /// Check `token` (the `token` query parameter, if any).
    async fn authenticate(
        &self,
        token: Option<&str>,
        request: &HandshakeRequest,
    ) -> Result<Value, AuthError>;
}

struct AuthFn<F>(F);

#[async_trait]
impl<F, Fut> AuthHook for AuthFn<F>
where
    F: Fn(Option<String>, HandshakeRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, AuthError>> + Send,
{
    async fn authenticate(
        &self,
        token: Option<&str>,
        request: &HandshakeRequest,
    ) -> Result<Value, AuthError> {
        (self.0)(token.map(str::to_owned), request.clone()).await
    }
}

/// Wrap an async closure as an [`AuthHook`].
pub fn auth_fn<F, Fut>(hook: F) -> Arc<dyn AuthHook>
where
    F: Fn(Option<String>, HandshakeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, AuthError>> + Send + 'static,
{
    Arc::new(AuthFn(hook))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let err = AuthError::default();
        assert_eq!(err.code(), 401);
        assert_eq!(err.to_string(), "Invalid token");
    }

    #[test]
    fn overrides() {
        let err = AuthError::new("Banned").with_code(403);
        assert_eq!(err.code(), 403);
        assert_eq!(err.message(), "Banned");
    }

    #[tokio::test]
    async fn closure_hook() {
        let hook = auth_fn(|token: Option<String>, _req| async move {
            match token.as_deref() {
                Some("good") => Ok(json!({"name": "alice"})),
                _ => Err(AuthError::default()),
            }
        });
        let request = HandshakeRequest::new("/room");
        assert_eq!(
            hook.authenticate(Some("good"), &request).await.unwrap(),
            json!({"name": "alice"})
        );
        assert!(hook.authenticate(None, &request).await.is_err());
    }
}
