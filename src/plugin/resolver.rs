//! Picks the exported function an HTTP request should call.
//!
//! Resolution walks an explicit, ordered list of strategies and stops at
//! the first one whose function the module exports:
//!
//! 1. `ExplicitName`: the second path segment, when present. No fallback.
//! 2. `ConventionName`: `<lowercase method>_<tag>`, e.g. `get_json`.
//! 3. `DefaultResponder`: `respond`.
//!
//! The existence check is passed in as a closure, so resolution can be
//! tested without a sandbox.

use crate::error::{Error, Result};

/// Generic function called when no convention-named function exists.
pub const DEFAULT_RESPONDER: &str = "respond";

/// `/<module>[/<function>]`, parsed from a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub module: String,
    pub function: Option<String>,
}

impl Route {
    /// Splits a request path. Returns `None` when there is no usable module
    /// segment; segments after the function name are ignored.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.trim_start_matches('/').split('/');
        let module = parts.next().filter(|m| !m.is_empty() && *m != "." && *m != "..")?;
        let function = parts.next().filter(|f| !f.is_empty()).map(str::to_string);
        Some(Self {
            module: module.to_string(),
            function,
        })
    }
}

/// Representation chosen from the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTag {
    Html,
    Json,
    Text,
}

impl ContentTag {
    /// html wins over json, json over text; a missing header means text.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let accept = accept.unwrap_or_default();
        if accept.contains("text/html") {
            ContentTag::Html
        } else if accept.contains("application/json") {
            ContentTag::Json
        } else {
            ContentTag::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTag::Html => "html",
            ContentTag::Json => "json",
            ContentTag::Text => "text",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContentTag::Html => "text/html",
            ContentTag::Json => "application/json",
            ContentTag::Text => "text/plain",
        }
    }
}

/// One way of naming the function to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    ExplicitName(String),
    ConventionName(String),
    DefaultResponder,
}

impl Strategy {
    pub fn function_name(&self) -> &str {
        match self {
            Strategy::ExplicitName(name) | Strategy::ConventionName(name) => name,
            Strategy::DefaultResponder => DEFAULT_RESPONDER,
        }
    }
}

/// The outcome of resolution: what to call and how to label the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub strategy: Strategy,
    pub content_type: &'static str,
}

impl Resolved {
    pub fn function_name(&self) -> &str {
        self.strategy.function_name()
    }
}

/// Ordered strategies for a request.
pub fn strategies(route: &Route, method: &str, tag: ContentTag) -> Vec<Strategy> {
    match &route.function {
        Some(name) => vec![Strategy::ExplicitName(name.clone())],
        None => vec![
            Strategy::ConventionName(format!("{}_{}", method.to_lowercase(), tag.as_str())),
            Strategy::DefaultResponder,
        ],
    }
}

/// First strategy whose function `exists`, or `FunctionNotFound` naming the
/// first candidate.
pub fn resolve(
    candidates: &[Strategy],
    tag: ContentTag,
    exists: impl Fn(&str) -> bool,
) -> Result<Resolved> {
    for strategy in candidates {
        if exists(strategy.function_name()) {
            return Ok(Resolved {
                content_type: content_type_for(strategy.function_name(), tag),
                strategy: strategy.clone(),
            });
        }
    }
    let wanted = candidates
        .first()
        .map(|s| s.function_name().to_string())
        .unwrap_or_default();
    Err(Error::FunctionNotFound(wanted))
}

/// Functions whose name ends in `json` always answer with JSON.
pub fn content_type_for(function: &str, tag: ContentTag) -> &'static str {
    if function.ends_with("json") {
        ContentTag::Json.content_type()
    } else {
        tag.content_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exports(names: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |name| names.contains(&name)
    }

    // ── Route parsing ───────────────────────────────

    #[test]
    fn test_route_module_only() {
        let r = Route::parse("/content").unwrap();
        assert_eq!(r.module, "content");
        assert_eq!(r.function, None);
    }

    #[test]
    fn test_route_module_and_function() {
        let r = Route::parse("/content/get_json").unwrap();
        assert_eq!(r.module, "content");
        assert_eq!(r.function.as_deref(), Some("get_json"));
    }

    #[test]
    fn test_route_trailing_slash_and_extra_segments() {
        assert_eq!(Route::parse("/content/").unwrap().function, None);
        let r = Route::parse("/content/echo/ignored/too").unwrap();
        assert_eq!(r.function.as_deref(), Some("echo"));
    }

    #[test]
    fn test_route_rejects_empty_and_dot_segments() {
        assert_eq!(Route::parse("/"), None);
        assert_eq!(Route::parse(""), None);
        assert_eq!(Route::parse("/../secret"), None);
        assert_eq!(Route::parse("/./x"), None);
    }

    // ── Content negotiation ─────────────────────────

    #[test]
    fn test_negotiate_precedence() {
        assert_eq!(ContentTag::negotiate(Some("text/html,application/json")), ContentTag::Html);
        assert_eq!(ContentTag::negotiate(Some("application/json, text/html")), ContentTag::Html);
        assert_eq!(ContentTag::negotiate(Some("application/json")), ContentTag::Json);
        assert_eq!(ContentTag::negotiate(Some("*/*")), ContentTag::Text);
        assert_eq!(ContentTag::negotiate(None), ContentTag::Text);
    }

    // ── Strategies ──────────────────────────────────

    #[test]
    fn test_strategies_explicit_only() {
        let route = Route::parse("/m/echo").unwrap();
        assert_eq!(
            strategies(&route, "POST", ContentTag::Json),
            vec![Strategy::ExplicitName("echo".into())]
        );
    }

    #[test]
    fn test_strategies_convention_then_default() {
        let route = Route::parse("/m").unwrap();
        assert_eq!(
            strategies(&route, "GET", ContentTag::Json),
            vec![
                Strategy::ConventionName("get_json".into()),
                Strategy::DefaultResponder
            ]
        );
    }

    // ── Resolution ──────────────────────────────────

    #[test]
    fn test_convention_preferred_over_respond() {
        let route = Route::parse("/m").unwrap();
        let c = strategies(&route, "GET", ContentTag::Json);
        let r = resolve(&c, ContentTag::Json, exports(&["get_json", "respond"])).unwrap();
        assert_eq!(r.function_name(), "get_json");
        assert_eq!(r.strategy, Strategy::ConventionName("get_json".into()));
        assert_eq!(r.content_type, "application/json");
    }

    #[test]
    fn test_falls_back_to_respond() {
        let route = Route::parse("/m").unwrap();
        let c = strategies(&route, "DELETE", ContentTag::Html);
        let r = resolve(&c, ContentTag::Html, exports(&["get_html", "respond"])).unwrap();
        assert_eq!(r.strategy, Strategy::DefaultResponder);
        assert_eq!(r.content_type, "text/html");
    }

    #[test]
    fn test_nothing_matches_is_not_found() {
        let route = Route::parse("/m").unwrap();
        let c = strategies(&route, "GET", ContentTag::Text);
        let err = resolve(&c, ContentTag::Text, exports(&["get_json"])).unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound(ref f) if f == "get_text"));
    }

    #[test]
    fn test_explicit_name_has_no_fallback() {
        let route = Route::parse("/m/missing").unwrap();
        let c = strategies(&route, "GET", ContentTag::Text);
        let err = resolve(&c, ContentTag::Text, exports(&["respond", "get_text"])).unwrap_err();
        assert!(matches!(err, Error::FunctionNotFound(ref f) if f == "missing"));
    }

    #[test]
    fn test_json_suffix_forces_json_content_type() {
        let route = Route::parse("/m/put_json").unwrap();
        let c = strategies(&route, "PUT", ContentTag::Html);
        let r = resolve(&c, ContentTag::Html, exports(&["put_json"])).unwrap();
        assert_eq!(r.content_type, "application/json");

        assert_eq!(content_type_for("echo", ContentTag::Text), "text/plain");
    }
}
