use crate::buffer::ResponseBuffer;
use crate::error::{ServerError, ServerResult};
use crate::http::{Method, Request, CAPTURE_SLOTS};
use log::{debug, error, info};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A handler fills the response buffer completely before returning
pub type HandlerFn = Arc<dyn Fn(&mut ResponseBuffer, &Request) + Send + Sync>;

/// Routing priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Checked first
    Specific,
    /// Checked only after every specific pattern
    Default,
}

/// A route entry in the router
#[derive(Clone)]
struct RouteEntry {
    /// The pattern as registered
    pattern: String,

    /// The pattern anchored at both ends
    regex: Regex,

    /// Handlers by method
    handlers: HashMap<Method, HandlerFn>,
}

// Custom Debug implementation for RouteEntry since handler can't be automatically derived
impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern)
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A successful resolution: the handler and the pattern's capture groups
#[derive(Clone)]
pub struct RouteMatch {
    pub handler: HandlerFn,
    pub captures: [String; CAPTURE_SLOTS],
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("captures", &self.captures)
            .finish()
    }
}

/// Two-tier regular-expression router.
///
/// Patterns must match the whole path. Within a tier they are tried in
/// registration order; the first pattern that matches the path *and* has a
/// handler for the method wins. Overlapping patterns are not detected.
#[derive(Clone, Debug, Default)]
pub struct Router {
    specific: Vec<RouteEntry>,
    default: Vec<RouteEntry>,
}

impl Router {
    /// Create a new router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` on `pattern` in the given tier.
    /// Registering the same pattern again adds or replaces a method on the
    /// existing entry and keeps its original position.
    pub fn register<F>(&mut self, pattern: &str, method: Method, handler: F, tier: Tier) -> ServerResult<()>
    where
        F: Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static,
    {
        self.register_handler(pattern, method, Arc::new(handler), tier)
    }

    pub fn register_handler(
        &mut self,
        pattern: &str,
        method: Method,
        handler: HandlerFn,
        tier: Tier,
    ) -> ServerResult<()> {
        let entries = match tier {
            Tier::Specific => &mut self.specific,
            Tier::Default => &mut self.default,
        };

        if let Some(entry) = entries.iter_mut().find(|e| e.pattern == pattern) {
            entry.handlers.insert(method, handler);
            info!("{} {} registered", method, pattern);
            return Ok(());
        }

        let regex = compile(pattern).map_err(|e| {
            error!("route {} {} rejected: {}", method, pattern, e);
            e
        })?;
        let mut handlers = HashMap::new();
        handlers.insert(method, handler);
        entries.push(RouteEntry {
            pattern: pattern.to_string(),
            regex,
            handlers,
        });
        info!("{} {} registered", method, pattern);
        Ok(())
    }

    /// Add a route to the specific tier
    pub fn specific<F>(&mut self, pattern: &str, method: Method, handler: F) -> ServerResult<()>
    where
        F: Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static,
    {
        self.register(pattern, method, handler, Tier::Specific)
    }

    /// Add a route to the default tier
    pub fn default_route<F>(&mut self, pattern: &str, method: Method, handler: F) -> ServerResult<()>
    where
        F: Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static,
    {
        self.register(pattern, method, handler, Tier::Default)
    }

    /// Find the handler for a path and method. A request whose method could
    /// not be parsed never matches.
    pub fn resolve(&self, path: &str, method: Option<Method>) -> Option<RouteMatch> {
        let method = method?;

        self.specific
            .iter()
            .chain(self.default.iter())
            .find_map(|entry| {
                let caps = entry.regex.captures(path)?;
                let handler = entry.handlers.get(&method)?;
                debug!("{} {} matched {}", method, path, entry.pattern);

                let mut captures: [String; CAPTURE_SLOTS] = Default::default();
                for (slot, group) in captures.iter_mut().zip(caps.iter().skip(1)) {
                    if let Some(m) = group {
                        *slot = m.as_str().to_string();
                    }
                }
                Some(RouteMatch {
                    handler: handler.clone(),
                    captures,
                })
            })
    }

    pub fn len(&self) -> usize {
        self.specific.len() + self.default.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compile(pattern: &str) -> ServerResult<Regex> {
    let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| ServerError::RoutePattern {
        pattern: pattern.to_string(),
        source,
    })?;

    // group 0 is the whole match
    let groups = regex.captures_len() - 1;
    if groups > CAPTURE_SLOTS {
        return Err(ServerError::Route(format!(
            "pattern {:?} has {} capture groups, at most {} are supported",
            pattern, groups, CAPTURE_SLOTS
        )));
    }
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(text: &'static str) -> impl Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static {
        move |out: &mut ResponseBuffer, _: &Request| out.put_str(text)
    }

    fn run(router: &Router, path: &str, method: Method) -> Option<(String, [String; 3])> {
        let found = router.resolve(path, Some(method))?;
        let mut out = ResponseBuffer::new(16);
        (found.handler)(&mut out, &Request::new(method, path));
        Some((String::from_utf8(out.as_bytes().to_vec()).unwrap(), found.captures))
    }

    #[test]
    fn test_specific_tier_wins() {
        let mut router = Router::new();
        router.default_route("^/(.*)$", Method::Get, marker("default")).unwrap();
        router.specific("^/api/(.*)$", Method::Get, marker("specific")).unwrap();

        let (body, captures) = run(&router, "/api/users", Method::Get).unwrap();
        assert_eq!(body, "specific");
        assert_eq!(captures[0], "users");

        let (body, _) = run(&router, "/home", Method::Get).unwrap();
        assert_eq!(body, "default");
    }

    #[test]
    fn test_registration_order_within_tier() {
        let mut router = Router::new();
        router.specific("/a(.*)", Method::Get, marker("first")).unwrap();
        router.specific("/ab(.*)", Method::Get, marker("second")).unwrap();

        let (body, captures) = run(&router, "/abc", Method::Get).unwrap();
        assert_eq!(body, "first");
        assert_eq!(captures[0], "bc");
    }

    #[test]
    fn test_method_mismatch_moves_to_next_pattern() {
        let mut router = Router::new();
        router.specific("^/?(.*)$", Method::Post, marker("echo")).unwrap();
        router.default_route("^/?123(.*)$", Method::Get, marker("static")).unwrap();

        let (body, captures) = run(&router, "/123/", Method::Get).unwrap();
        assert_eq!(body, "static");
        assert_eq!(captures, ["/".to_string(), String::new(), String::new()]);

        let (body, _) = run(&router, "/123/", Method::Post).unwrap();
        assert_eq!(body, "echo");

        assert!(router.resolve("/123/", Some(Method::Head)).is_none());
    }

    #[test]
    fn test_patterns_match_whole_path() {
        let mut router = Router::new();
        router.specific("/users", Method::Get, marker("users")).unwrap();

        assert!(router.resolve("/users", Some(Method::Get)).is_some());
        assert!(router.resolve("/users/1", Some(Method::Get)).is_none());
        assert!(router.resolve("/x/users", Some(Method::Get)).is_none());
    }

    #[test]
    fn test_unparsed_method_never_matches() {
        let mut router = Router::new();
        router.specific(".*", Method::Get, marker("any")).unwrap();
        assert!(router.resolve("", None).is_none());
    }

    #[test]
    fn test_same_pattern_accumulates_methods() {
        let mut router = Router::new();
        router.specific("/r", Method::Get, marker("get")).unwrap();
        router.specific("/r", Method::Head, marker("head")).unwrap();
        assert_eq!(router.len(), 1);

        assert_eq!(run(&router, "/r", Method::Head).unwrap().0, "head");
        assert_eq!(run(&router, "/r", Method::Get).unwrap().0, "get");
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        let mut router = Router::new();
        let err = router.specific("/(unclosed", Method::Get, marker("x")).unwrap_err();
        assert!(matches!(err, ServerError::RoutePattern { .. }));

        let err = router
            .specific("/(a)(b)(c)(d)", Method::Get, marker("x"))
            .unwrap_err();
        assert!(matches!(err, ServerError::Route(_)));
        assert!(router.is_empty());
    }

    #[test]
    fn test_optional_group_leaves_slot_empty() {
        let mut router = Router::new();
        router
            .specific("/(\\w+)(?:/(\\d+))?", Method::Get, marker("x"))
            .unwrap();

        let found = router.resolve("/items", Some(Method::Get)).unwrap();
        assert_eq!(found.captures[0], "items");
        assert_eq!(found.captures[1], "");

        let found = router.resolve("/items/42", Some(Method::Get)).unwrap();
        assert_eq!(found.captures[1], "42");
    }
}
