//! Request path helpers.
//!
//! Maps client-facing paths onto the single fixed upstream.

use url::Url;

/// Prefix under which the relay exposes the upstream.
pub const PROXY_PREFIX: &str = "/proxy";

/// Map a client request (path plus optional query) to the upstream path.
///
/// Strips [`PROXY_PREFIX`], defaults to `/` when nothing remains, and ensures
/// a leading slash. The query string is carried over untouched.
pub fn upstream_path(request_path: &str) -> String {
    let stripped = request_path
        .strip_prefix(PROXY_PREFIX)
        .unwrap_or(request_path);

    if stripped.is_empty() {
        "/".to_string()
    } else if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

/// Normalise an operator-supplied path.
///
/// Absolute URLs are reduced to their path and query; anything unparsable
/// falls back to the root.
pub fn normalize_path(path: Option<&str>) -> String {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return "/".to_string();
    };

    if path.starts_with("http") {
        return match Url::parse(path) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            Err(_) => "/".to_string(),
        };
    }

    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Join the upstream base with a normalised path.
///
/// Concatenates rather than resolving, so a base with a path prefix keeps it.
pub fn join_upstream(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_proxy_prefix_and_keeps_query() {
        assert_eq!(upstream_path("/proxy/leaderboard?region=NA"), "/leaderboard?region=NA");
        assert_eq!(upstream_path("/proxy"), "/");
        assert_eq!(upstream_path("/proxy/"), "/");
        assert_eq!(upstream_path("/proxy?x=1"), "/?x=1");
        assert_eq!(upstream_path("ranking"), "/ranking");
    }

    #[test]
    fn normalizes_operator_paths() {
        assert_eq!(normalize_path(None), "/");
        assert_eq!(normalize_path(Some("")), "/");
        assert_eq!(normalize_path(Some("rank")), "/rank");
        assert_eq!(
            normalize_path(Some("https://mapleranks.com/u/abc?x=1")),
            "/u/abc?x=1"
        );
        assert_eq!(normalize_path(Some("http://[::bad")), "/");
    }

    #[test]
    fn joins_without_double_slash() {
        let base = Url::parse("https://example.com/").unwrap();
        let url = join_upstream(&base, "/a?b=1").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a?b=1");

        let base = Url::parse("http://127.0.0.1:8080").unwrap();
        let url = join_upstream(&base, "/").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/");
    }
}
