//! Dedup key canonicalization.
//!
//! Two search results are the same item when their canonical URLs are equal.
//! The rule:
//!
//! 1. The trimmed URL must parse as an absolute URL.
//! 2. Scheme and host are lowercased, default ports and dot segments are
//!    dropped (the `url` parser does this).
//! 3. The fragment is removed.
//! 4. Tracking parameters (`utm_*`, `gclid`, `fbclid`) are removed, the
//!    remaining query pairs are sorted, and an empty query is dropped.
//! 5. A trailing `/` is removed from any path other than the root.
//!
//! Path case and scheme (`http` vs `https`) are significant.

use url::Url;

const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid"];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Compute the dedup key for a URL, or the reason it cannot have one.
pub fn canonical_key(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("url is missing".to_string());
    }

    let mut url =
        Url::parse(trimmed).map_err(|e| format!("url '{}' is not valid: {}", trimmed, e))?;

    url.set_fragment(None);

    if url.cannot_be_a_base() {
        return Ok(url.to_string());
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/').to_string();
        url.set_path(&stripped);
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> String {
        canonical_key(s).unwrap()
    }

    #[test]
    fn scheme_and_host_case_are_ignored() {
        assert_eq!(key("HTTPS://Example.COM/Docs"), key("https://example.com/Docs"));
    }

    #[test]
    fn path_case_is_significant() {
        assert_ne!(key("https://example.com/Docs"), key("https://example.com/docs"));
    }

    #[test]
    fn root_with_and_without_slash_match() {
        assert_eq!(key("https://a.com"), key("https://a.com/"));
    }

    #[test]
    fn trailing_slash_is_dropped() {
        assert_eq!(key("https://a.com/blog/"), "https://a.com/blog");
    }

    #[test]
    fn fragment_is_dropped() {
        assert_eq!(key("https://a.com/page#section-2"), "https://a.com/page");
    }

    #[test]
    fn query_order_is_normalized() {
        assert_eq!(key("https://a.com/s?b=2&a=1"), key("https://a.com/s?a=1&b=2"));
    }

    #[test]
    fn tracking_params_are_removed() {
        assert_eq!(
            key("https://a.com/post?utm_source=x&id=7&utm_medium=y&gclid=abc"),
            "https://a.com/post?id=7"
        );
        assert_eq!(key("https://a.com/post?utm_source=x"), "https://a.com/post");
    }

    #[test]
    fn default_port_is_dropped() {
        assert_eq!(key("https://a.com:443/x"), key("https://a.com/x"));
    }

    #[test]
    fn scheme_is_significant() {
        assert_ne!(key("http://a.com/x"), key("https://a.com/x"));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(key("  https://a.com/x \n"), "https://a.com/x");
    }

    #[test]
    fn empty_and_relative_urls_are_rejected() {
        assert!(canonical_key("").is_err());
        assert!(canonical_key("   ").is_err());
        assert!(canonical_key("/relative/path").is_err());
        assert!(canonical_key("not a url").is_err());
    }
}
