//! Handshake admission: route lookup, query parsing and auth.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::errors::HandshakeError;
use crate::room::RoomContext;
use crate::routes::{Route, RouteTable};

/// Query parameter carrying the auth token. Never forwarded to rooms.
pub const TOKEN_PARAM: &str = "token";

/// Namespace used when the request path is empty.
pub const DEFAULT_NS: &str = "*";

/// The parts of an upgrade request admission looks at.
#[derive(Clone, Debug, Default)]
pub struct HandshakeRequest {
    /// Request path.
    pub path: String,
    /// Raw query string, without `?`.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl HandshakeRequest {
    /// Request for `path` with no query or headers.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Who a connection is, as established by the handshake.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    /// Namespace (request path).
    pub ns: String,
    /// Route parameters.
    pub params: HashMap<String, String>,
    /// Query parameters, `token` removed.
    pub query: Map<String, Value>,
    /// Value returned by the auth hook.
    pub user: Option<Value>,
}

impl Identity {
    /// Identity in `ns` with nothing else attached.
    pub fn new(ns: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            ..Self::default()
        }
    }

    /// Room context for a room created by this connection on `route`.
    pub fn room_context(&self, route: &Route) -> RoomContext {
        RoomContext {
            ns: self.ns.clone(),
            route: route.pattern.as_str().to_owned(),
            params: self.params.clone(),
            query: self.query.clone(),
            user: self.user.clone(),
        }
    }

    /// Data sent with this connection's JOIN: the query plus `user`.
    pub fn join_data(&self) -> Value {
        let mut data = self.query.clone();
        if let Some(user) = &self.user {
            let _ = data.insert("user".to_owned(), user.clone());
        }
        Value::Object(data)
    }
}

/// An admitted handshake.
#[derive(Debug)]
pub struct Handshake {
    /// Matched route.
    pub route: Arc<Route>,
    /// Connection identity.
    pub identity: Identity,
}

/// Admit or reject `request`.
#[instrument(skip_all, fields(path = %request.path))]
pub async fn verify(
    routes: &RouteTable,
    request: &HandshakeRequest,
) -> Result<Handshake, HandshakeError> {
    let ns = if request.path.is_empty() {
        DEFAULT_NS.to_owned()
    } else {
        request.path.clone()
    };
    let Some((route, params)) = routes.find(&ns) else {
        debug!("no route matched");
        return Err(HandshakeError::RouteNotFound { path: ns });
    };
    let (query, token) = parse_query(request.query.as_deref());

    let user = match &route.options.auth {
        Some(hook) => match hook.authenticate(token.as_deref(), request).await {
            Ok(user) => Some(user),
            Err(error) => {
                debug!(code = error.code(), message = error.message(), "auth rejected");
                return Err(HandshakeError::Unauthorized {
                    code: error.code(),
                    message: error.message().to_owned(),
                });
            }
        },
        None => None,
    };

    Ok(Handshake {
        route,
        identity: Identity {
            ns,
            params,
            query,
            user,
        },
    })
}

/// Split a query string into parameters and the auth token.
///
/// Repeated keys keep the last value.
pub fn parse_query(query: Option<&str>) -> (Map<String, Value>, Option<String>) {
    let mut params = Map::new();
    let mut token = None;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        if key == TOKEN_PARAM {
            token = Some(value.into_owned());
        } else {
            let _ = params.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    (params, token)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::auth::{AuthError, auth_fn};
    use crate::routes::RouteOptions;

    fn table(options: RouteOptions) -> RouteTable {
        let mut table = RouteTable::new();
        table.add("/:id", Arc::new(|_, _| {}), options).unwrap();
        table
    }

    #[test]
    fn query_strips_token() {
        let (params, token) = parse_query(Some("token=abc&name=bob%20b&x=1&x=2"));
        assert_eq!(token.as_deref(), Some("abc"));
        assert_eq!(Value::Object(params), json!({"name": "bob b", "x": "2"}));
    }

    #[test]
    fn missing_query() {
        let (params, token) = parse_query(None);
        assert!(params.is_empty());
        assert!(token.is_none());
    }

    #[test]
    fn join_data_includes_user() {
        let mut identity = Identity::new("/r");
        let _ = identity.query.insert("a".into(), json!("1"));
        identity.user = Some(json!({"name": "alice"}));
        assert_eq!(identity.join_data(), json!({"a": "1", "user": {"name": "alice"}}));
    }

    #[tokio::test]
    async fn admits_matching_route() {
        let request = HandshakeRequest::new("/room1").with_query("token=t&color=red");
        let handshake = verify(&table(RouteOptions::new()), &request).await.unwrap();
        assert_eq!(handshake.identity.ns, "/room1");
        assert_eq!(handshake.identity.params["id"], "room1");
        assert_eq!(Value::Object(handshake.identity.query), json!({"color": "red"}));
        assert!(handshake.identity.user.is_none());
    }

    #[tokio::test]
    async fn unknown_route_is_rejected() {
        let request = HandshakeRequest::new("/a/b");
        let result = verify(&table(RouteOptions::new()), &request).await;
        assert_matches!(result, Err(HandshakeError::RouteNotFound { .. }));
    }

    #[tokio::test]
    async fn auth_user_is_attached() {
        let hook = auth_fn(|token: Option<String>, _req| async move {
            token
                .filter(|t| t == "secret")
                .map(|_| json!({"name": "alice"}))
                .ok_or_else(AuthError::default)
        });
        let routes = table(RouteOptions::new().auth(hook));

        let ok = verify(&routes, &HandshakeRequest::new("/r").with_query("token=secret"))
            .await
            .unwrap();
        assert_eq!(ok.identity.user, Some(json!({"name": "alice"})));

        let denied = verify(&routes, &HandshakeRequest::new("/r")).await;
        assert_matches!(
            denied,
            Err(HandshakeError::Unauthorized { code: 401, ref message }) if message == "Invalid token"
        );
    }

    #[tokio::test]
    async fn auth_can_override_code() {
        let hook = auth_fn(|_, _| async { Err(AuthError::new("Banned").with_code(403)) });
        let routes = table(RouteOptions::new().auth(hook));
        let denied = verify(&routes, &HandshakeRequest::new("/r")).await;
        assert_matches!(denied, Err(HandshakeError::Unauthorized { code: 403, .. }));
    }
}
