//! Destination syntax.
//!
//! A destination is an opaque byte string with two recognized shapes: a
//! simple identity (matched by byte equality) or a URI
//! (`scheme://[user-info@]host[:port]/path[?query][#fragment]`). URI
//! destinations compare by canonical form; the fragment carries per-channel
//! configuration and never participates in equality.

use url::Url;

/// Sentinel destination designating the default route.
pub const DST_DEFAULT: &str = "*";

/// A destination that parses as a URI.
#[derive(Debug, Clone)]
pub struct DstUri {
    url: Url,
}

impl DstUri {
    /// Parse a destination as a URI. Simple identities (including the
    /// default-route sentinel) return `None`.
    pub fn parse(dst: &str) -> Option<Self> {
        if dst.is_empty() {
            return None;
        }
        Url::parse(dst).ok().map(|url| Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Whether this URI's scheme supports on-demand outbound channel
    /// creation. HTTP destinations are treated like websocket ones.
    pub fn supports_outbound(&self) -> bool {
        matches!(self.scheme(), "ws" | "wss" | "http" | "https")
    }

    /// Canonical form: scheme, user-info, host, port, normalized path and
    /// query string. The fragment is dropped.
    pub fn canonical(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }

    /// Look up a key/value pair in the URI fragment.
    pub fn fragment_param(&self, key: &str) -> Option<String> {
        let fragment = self.url.fragment()?;
        url::form_urlencoded::parse(fragment.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// Destination equality.
///
/// Two simple identities compare byte-for-byte; two URIs compare by
/// canonical form. A URI never equals a simple identity, even if the bytes
/// match.
pub fn dst_is_equal(d1: &str, d2: &str) -> bool {
    match (DstUri::parse(d1), DstUri::parse(d2)) {
        (None, None) => d1 == d2,
        (Some(u1), Some(u2)) => u1.canonical() == u2.canonical(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_identities_compare_by_bytes() {
        assert!(dst_is_equal("peer1", "peer1"));
        assert!(!dst_is_equal("peer1", "peer2"));
        assert!(dst_is_equal(DST_DEFAULT, DST_DEFAULT));
    }

    #[test]
    fn uris_compare_canonically() {
        assert!(dst_is_equal("ws://h:1/r", "ws://h:1/r"));
        assert!(dst_is_equal("ws://H:1/r", "ws://h:1/r"));
        assert!(dst_is_equal("ws://h:1/a/../r", "ws://h:1/r"));
        assert!(!dst_is_equal("ws://h:1/r", "ws://h:2/r"));
        assert!(!dst_is_equal("ws://h:1/r", "wss://h:1/r"));
    }

    #[test]
    fn fragment_does_not_participate_in_equality() {
        assert!(dst_is_equal(
            "ws://h:1/r#idle_close_timeout=5",
            "ws://h:1/r"
        ));
    }

    #[test]
    fn uri_never_equals_simple_identity() {
        assert!(!dst_is_equal("ws://h:1/r", "peer1"));
        assert!(!dst_is_equal("peer1", "ws://h:1/r"));
    }

    #[test]
    fn plain_identities_are_not_uris() {
        assert!(DstUri::parse("peer1").is_none());
        assert!(DstUri::parse("*").is_none());
        assert!(DstUri::parse("").is_none());
    }

    #[test]
    fn outbound_schemes() {
        for dst in ["ws://h/", "wss://h/", "http://h/", "https://h/"] {
            assert!(DstUri::parse(dst).unwrap().supports_outbound(), "{dst}");
        }
        assert!(!DstUri::parse("mqtt://h/").unwrap().supports_outbound());
    }

    #[test]
    fn canonical_strips_fragment() {
        let uri = DstUri::parse("ws://h:1/r?q=1#a=b&c=d").unwrap();
        assert_eq!(uri.canonical(), "ws://h:1/r?q=1");
    }

    #[test]
    fn fragment_params() {
        let uri = DstUri::parse("wss://h/r#ssl_ca_file=ca.pem&idle_close_timeout=30").unwrap();
        assert_eq!(uri.fragment_param("ssl_ca_file").as_deref(), Some("ca.pem"));
        assert_eq!(
            uri.fragment_param("idle_close_timeout").as_deref(),
            Some("30")
        );
        assert_eq!(uri.fragment_param("missing"), None);
    }
}
