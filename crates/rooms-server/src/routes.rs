//! Namespace routing.
//!
//! Patterns are `/`-separated segments: literals, `:name` parameters and a
//! trailing `*` that swallows the rest of the path (captured as `_`).
//! Routes are tried in registration order; the first match wins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AuthHook;
use crate::errors::RouteError;
use crate::room::{Room, RoomContext};

/// Sets up a freshly created room.
pub type RoomHandler = Arc<dyn Fn(&mut Room, &RoomContext) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled route pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse `source`. An empty pattern means `/`.
    pub fn parse(source: &str) -> Result<Self, RouteError> {
        let source = match source {
            "" => "/".to_owned(),
            s if s.starts_with('/') => s.to_owned(),
            s => format!("/{s}"),
        };
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: source.clone(),
            reason: reason.to_owned(),
        };

        let raw: Vec<&str> = source.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (index, segment) in raw.iter().enumerate() {
            if *segment == "*" {
                if index + 1 != raw.len() {
                    return Err(invalid("`*` must be the last segment"));
                }
                segments.push(Segment::Wildcard);
            } else if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid("parameter names must be non-empty [A-Za-z0-9_]"));
                }
                segments.push(Segment::Param(name.to_owned()));
            } else {
                segments.push(Segment::Literal((*segment).to_owned()));
            }
        }
        Ok(Self { source, segments })
    }

    /// Pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match `path`, returning captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    let _ = params.insert("_".to_owned(), parts.get(index..)?.join("/"));
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let _ = params.insert(name.clone(), (*parts.get(index)?).to_owned());
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

/// Per-route options.
#[derive(Clone, Default)]
pub struct RouteOptions {
    /// Admission hook run before the upgrade.
    pub auth: Option<Arc<dyn AuthHook>>,
}

impl std::fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteOptions")
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

impl RouteOptions {
    /// No auth.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `hook` to accept the handshake.
    #[must_use]
    pub fn auth(mut self, hook: Arc<dyn AuthHook>) -> Self {
        self.auth = Some(hook);
        self
    }
}

/// A registered room route.
pub struct Route {
    /// Compiled pattern.
    pub pattern: RoutePattern,
    /// Room setup.
    pub handler: RoomHandler,
    /// Options.
    pub options: RouteOptions,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Ordered route list.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Re-registering a pattern replaces it in place.
    pub fn add(
        &mut self,
        pattern: &str,
        handler: RoomHandler,
        options: RouteOptions,
    ) -> Result<(), RouteError> {
        let route = Arc::new(Route {
            pattern: RoutePattern::parse(pattern)?,
            handler,
            options,
        });
        match self
            .routes
            .iter_mut()
            .find(|existing| existing.pattern == route.pattern)
        {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
        Ok(())
    }

    /// First route matching `path`.
    pub fn find(&self, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|params| (Arc::clone(route), params)))
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn noop() -> RoomHandler {
        Arc::new(|_, _| {})
    }

    #[test]
    fn literal_pattern() {
        let pattern = RoutePattern::parse("/lobby").unwrap();
        assert!(pattern.matches("/lobby").unwrap().is_empty());
        assert!(pattern.matches("/lobby/").is_some());
        assert!(pattern.matches("/other").is_none());
        assert!(pattern.matches("/lobby/x").is_none());
    }

    #[test]
    fn param_pattern() {
        let pattern = RoutePattern::parse("/chat/:id").unwrap();
        let params = pattern.matches("/chat/42").unwrap();
        assert_eq!(params["id"], "42");
        assert!(pattern.matches("/chat").is_none());
    }

    #[test]
    fn wildcard_pattern() {
        let pattern = RoutePattern::parse("/files/*").unwrap();
        assert_eq!(pattern.matches("/files/a/b").unwrap()["_"], "a/b");
        assert_eq!(pattern.matches("/files").unwrap()["_"], "");
        assert!(RoutePattern::parse("*").unwrap().matches("/anything").is_some());
    }

    #[test]
    fn empty_pattern_is_root() {
        let pattern = RoutePattern::parse("").unwrap();
        assert_eq!(pattern.as_str(), "/");
        assert!(pattern.matches("/").is_some());
        assert!(pattern.matches("/x").is_none());
    }

    #[test]
    fn invalid_patterns() {
        assert_matches!(RoutePattern::parse("/:"), Err(RouteError::InvalidPattern { .. }));
        assert_matches!(RoutePattern::parse("/*/x"), Err(RouteError::InvalidPattern { .. }));
    }

    #[test]
    fn first_match_wins() {
        let mut table = RouteTable::new();
        table.add("/a/:id", noop(), RouteOptions::new()).unwrap();
        table.add("/a/*", noop(), RouteOptions::new()).unwrap();
        let (route, params) = table.find("/a/1").unwrap();
        assert_eq!(route.pattern.as_str(), "/a/:id");
        assert_eq!(params["id"], "1");
        let (route, _) = table.find("/a/1/2").unwrap();
        assert_eq!(route.pattern.as_str(), "/a/*");
    }

    #[test]
    fn re_registering_replaces() {
        let mut table = RouteTable::new();
        table.add("/a", noop(), RouteOptions::new()).unwrap();
        table.add("a", noop(), RouteOptions::new()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn no_match() {
        let table = RouteTable::new();
        assert!(table.find("/x").is_none());
    }

    #[test]
    fn debug_shows_pattern() {
        let mut table = RouteTable::new();
        table.add("/rooms/:id", noop(), RouteOptions::new()).unwrap();
        let (route, _) = table.find("/rooms/1").unwrap();
        let rendered = format!("{route:?}");
        assert!(rendered.contains("/rooms/:id"));
        assert!(rendered.contains("auth: false"));
    }
}
