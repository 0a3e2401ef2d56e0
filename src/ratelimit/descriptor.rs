//! Request identity and counter key generation.

use std::collections::HashMap;

use super::counter::TimeWindow;

/// A stable identifier for a route handler.
///
/// The group is the controller or router the handler belongs to. Rules can
/// be attached to either level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteId {
    /// The group (controller/router) this handler belongs to
    pub group: String,
    /// The handler name within the group
    pub handler: String,
}

impl RouteId {
    /// Create a new route identifier.
    pub fn new(group: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            handler: handler.into(),
        }
    }

    /// The base counting key for this route.
    ///
    /// Parts are joined with `:` after escaping `%` and `:`, so no two
    /// routes share a key whatever characters their names contain.
    pub fn key_base(&self, prefix: &str) -> String {
        let group = escape_key_part(&self.group);
        let handler = escape_key_part(&self.handler);
        if prefix.is_empty() {
            format!("{}:{}", group, handler)
        } else {
            format!("{}:{}:{}", escape_key_part(prefix), group, handler)
        }
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.handler)
    }
}

/// The parts of an inbound request the throttler looks at.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The handler serving this request
    pub route: RouteId,
    /// The `User-Agent` header value, if any
    pub user_agent: Option<String>,
    /// Host-supplied values available to the skip predicate
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    /// Create a context for a route with no user agent.
    pub fn new(route: RouteId) -> Self {
        Self {
            route,
            user_agent: None,
            attributes: HashMap::new(),
        }
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Attach a host-supplied attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up a host-supplied attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

fn escape_key_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

/// Build the per-window counter key from a key base.
///
/// Distinct windows always produce distinct keys so multi-window limits
/// never share a bucket.
pub fn window_key(key_base: &str, window: TimeWindow) -> String {
    format!("{}:{}", key_base, window.tag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_base() {
        let route = RouteId::new("AppController", "getHello");
        assert_eq!(route.key_base("throttler"), "throttler:AppController:getHello");
        assert_eq!(route.key_base(""), "AppController:getHello");
    }

    #[test]
    fn test_key_base_hyphenated_names_do_not_collide() {
        let a = RouteId::new("users-admin", "list").key_base("throttler");
        let b = RouteId::new("users", "admin-list").key_base("throttler");
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_base_escapes_separator() {
        let a = RouteId::new("a:b", "c").key_base("t");
        let b = RouteId::new("a", "b:c").key_base("t");
        let c = RouteId::new("a%3Ab", "c").key_base("t");

        assert_eq!(a, "t:a%3Ab:c");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_window_keys_are_distinct() {
        let base = RouteId::new("limit", "index").key_base("t");
        let minute = window_key(&base, TimeWindow::Minute);
        let hour = window_key(&base, TimeWindow::Hour);
        let custom = window_key(&base, TimeWindow::Custom(60));

        assert_eq!(minute, "t:limit:index:minute");
        assert_ne!(minute, hour);
        assert_ne!(minute, custom);
    }

    #[test]
    fn test_route_id_equality() {
        let a = RouteId::new("group", "handler");
        let b = RouteId::new("group", "handler");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "group/handler");
    }

    #[test]
    fn test_request_context_builder() {
        let ctx = RequestContext::new(RouteId::new("app", "index"))
            .with_user_agent("curl/8.0")
            .with_attribute("ip", "10.0.0.1");

        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(ctx.attribute("ip"), Some("10.0.0.1"));
        assert_eq!(ctx.attribute("missing"), None);
    }
}
