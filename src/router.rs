//! Alias routing: splitting the request target into service alias and rest.
//!
//! Clients address backends as `/<alias>/<rest>`; the alias selects the
//! service descriptor and the rest (plus query string) is replayed against
//! the service's `base_url`.

use http::Uri;

/// The routed parts of a request target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTarget<'a> {
    /// First path segment; empty when the request is for `/`
    pub alias: &'a str,
    /// Remaining path after the alias, without its leading `/`
    pub rest: &'a str,
    /// Query string, without the `?`
    pub query: Option<&'a str>,
}

impl<'a> RouteTarget<'a> {
    /// The upstream path-and-query to append to the service `base_url`.
    pub fn upstream_path_and_query(&self) -> String {
        match self.query {
            Some(q) => format!("/{}?{}", self.rest, q),
            None => format!("/{}", self.rest),
        }
    }
}

/// Split a request URI into `(alias, rest, query)`.
pub fn split_target(uri: &Uri) -> RouteTarget<'_> {
    let path = uri.path().trim_start_matches('/');
    let (alias, rest) = match path.split_once('/') {
        Some((alias, rest)) => (alias, rest),
        None => (path, ""),
    };

    RouteTarget {
        alias,
        rest,
        query: uri.query(),
    }
}
