//! Client options.

use std::time::Duration;

use rooms_settings::ClientSettings;

/// How a [`ClientSocket`](crate::ClientSocket) connects and recovers.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Sent as the `token` query parameter.
    pub token: Option<String>,
    /// Extra query parameters.
    pub params: Vec<(String, String)>,
    /// Delay before each reconnect.
    pub timeout: Duration,
    /// Reconnect limit. `None` retries forever.
    pub attempts: Option<u32>,
    /// Close with 4001 when no PING arrives for this long.
    pub ping_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            token: None,
            params: Vec::new(),
            timeout: Duration::from_secs(1),
            attempts: None,
            ping_interval: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the auth token.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap reconnects.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the inactivity window.
    #[must_use]
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }
}

impl From<&ClientSettings> for ClientOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            attempts: settings.attempts,
            ping_interval: settings.ping_interval(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(1));
        assert!(options.attempts.is_none());
        assert_eq!(options.ping_interval, Duration::from_secs(10));
    }

    #[test]
    fn builder() {
        let options = ClientOptions::new()
            .token("t")
            .param("color", "red")
            .attempts(3)
            .timeout(Duration::from_millis(5));
        assert_eq!(options.token.as_deref(), Some("t"));
        assert_eq!(options.params, vec![("color".to_owned(), "red".to_owned())]);
        assert_eq!(options.attempts, Some(3));
    }

    #[test]
    fn from_settings() {
        let settings = ClientSettings {
            timeout_ms: 250,
            attempts: Some(2),
            ping_interval_ms: 3000,
        };
        let options = ClientOptions::from(&settings);
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.attempts, Some(2));
        assert_eq!(options.ping_interval, Duration::from_secs(3));
    }
}
