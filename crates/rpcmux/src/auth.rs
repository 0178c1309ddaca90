//! Digest authentication against an htdigest credential file.

use std::fmt::Write as _;
use std::fs;

use md5::{Digest, Md5};
use serde::Deserialize;

use rpcmux_core::codes;

use crate::{Request, Rpc};

// RPC frames have no method or URI in the HTTP sense; fixed placeholders
// participate in the hash instead, on both ends.
const DIGEST_METHOD: &str = "dummy_method";
const DIGEST_URI: &str = "dummy_uri";
const DIGEST_QOP: &str = "auth";
const DIGEST_NC: &str = "1";

#[derive(Deserialize)]
struct DigestPayload {
    realm: String,
    username: String,
    nonce: String,
    cnonce: String,
    response: String,
}

impl Rpc {
    /// Validate the request's `auth` field as an HTTP-style digest response
    /// against the configured realm and htdigest file.
    ///
    /// On success, `authn.username` is populated. Failure to open the
    /// credential store responds 500 and consumes the handle (`None`).
    /// Every other outcome returns the handle: authentication failure does
    /// not by itself reject the request, callers compose policy.
    pub fn check_digest_auth(&mut self, mut req: Request) -> Option<Request> {
        if !req.authn.username.is_empty() {
            tracing::debug!(
                username = %req.authn.username,
                "already have username in request info, skip checking"
            );
            return Some(req);
        }
        let Some(auth) = req.auth.as_deref() else {
            return Some(req);
        };
        let payload: DigestPayload = match serde_json::from_str(auth.get()) {
            Ok(payload) => payload,
            Err(_) => {
                tracing::warn!("not all auth parts are present, ignoring");
                return Some(req);
            }
        };
        tracing::debug!(
            realm = %payload.realm,
            username = %payload.username,
            nonce = %payload.nonce,
            cnonce = %payload.cnonce,
            "got auth"
        );
        match self.config().auth_domain.as_deref() {
            Some(domain) if domain == payload.realm => {}
            domain => {
                tracing::warn!(
                    expected = domain.unwrap_or(""),
                    got = %payload.realm,
                    "auth request with different realm"
                );
                return Some(req);
            }
        }
        let auth_file = self.config().auth_file.clone();
        let htdigest = match auth_file.map(fs::read_to_string) {
            Some(Ok(contents)) => contents,
            _ => {
                self.send_error(req, codes::INTERNAL, "failed to open htdigest file");
                return None;
            }
        };
        let authenticated = verify_digest(&htdigest, &payload);
        tracing::debug!(authenticated, "digest check");
        if authenticated {
            req.authn.username = payload.username;
        }
        Some(req)
    }
}

/// Check a digest response against `user:realm:HA1` htdigest lines.
fn verify_digest(htdigest: &str, auth: &DigestPayload) -> bool {
    for line in htdigest.lines() {
        let mut parts = line.trim().splitn(3, ':');
        let (Some(user), Some(realm), Some(ha1)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if user != auth.username || realm != auth.realm {
            continue;
        }
        let ha2 = md5_hex(&format!("{DIGEST_METHOD}:{DIGEST_URI}"));
        let expected = md5_hex(&format!(
            "{ha1}:{}:{DIGEST_NC}:{}:{DIGEST_QOP}:{ha2}",
            auth.nonce, auth.cnonce
        ));
        if expected.eq_ignore_ascii_case(&auth.response) {
            return true;
        }
    }
    false
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    let mut out = String::with_capacity(2 * digest.len());
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde_json::value::RawValue;

    use rpcmux_core::RpcConfig;

    use crate::request::AuthnInfo;

    use super::*;

    fn ha1(user: &str, realm: &str, password: &str) -> String {
        md5_hex(&format!("{user}:{realm}:{password}"))
    }

    fn response_for(user: &str, realm: &str, password: &str, nonce: &str, cnonce: &str) -> String {
        let ha2 = md5_hex(&format!("{DIGEST_METHOD}:{DIGEST_URI}"));
        md5_hex(&format!(
            "{}:{nonce}:{DIGEST_NC}:{cnonce}:{DIGEST_QOP}:{ha2}",
            ha1(user, realm, password)
        ))
    }

    fn payload(user: &str, realm: &str, password: &str) -> DigestPayload {
        DigestPayload {
            realm: realm.to_string(),
            username: user.to_string(),
            nonce: "abc".to_string(),
            cnonce: "xyz".to_string(),
            response: response_for(user, realm, password, "abc", "xyz"),
        }
    }

    #[test]
    fn valid_response_verifies() {
        let htdigest = format!("joe:realm1:{}\n", ha1("joe", "realm1", "secret"));
        assert!(verify_digest(&htdigest, &payload("joe", "realm1", "secret")));
    }

    #[test]
    fn wrong_password_fails() {
        let htdigest = format!("joe:realm1:{}\n", ha1("joe", "realm1", "secret"));
        assert!(!verify_digest(&htdigest, &payload("joe", "realm1", "wrong")));
    }

    #[test]
    fn unknown_user_fails() {
        let htdigest = format!("joe:realm1:{}\n", ha1("joe", "realm1", "secret"));
        assert!(!verify_digest(&htdigest, &payload("ann", "realm1", "secret")));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let htdigest = format!(
            "# comment\nnot-a-credential\njoe:realm1:{}\n",
            ha1("joe", "realm1", "secret")
        );
        assert!(verify_digest(&htdigest, &payload("joe", "realm1", "secret")));
    }

    #[test]
    fn response_comparison_is_case_insensitive() {
        let htdigest = format!("joe:realm1:{}\n", ha1("joe", "realm1", "secret"));
        let mut p = payload("joe", "realm1", "secret");
        p.response = p.response.to_uppercase();
        assert!(verify_digest(&htdigest, &p));
    }

    fn auth_raw(user: &str, realm: &str, password: &str) -> Box<RawValue> {
        let p = payload(user, realm, password);
        let json = serde_json::json!({
            "realm": p.realm,
            "username": p.username,
            "nonce": p.nonce,
            "cnonce": p.cnonce,
            "response": p.response,
        });
        RawValue::from_string(json.to_string()).unwrap()
    }

    fn request_with_auth(auth: Option<Box<RawValue>>) -> Request {
        Request {
            id: 1,
            src: "peer".to_string(),
            dst: String::new(),
            tag: String::new(),
            auth,
            method: "M".to_string(),
            channel: 1,
            args_fmt: String::new(),
            authn: AuthnInfo::default(),
        }
    }

    fn engine_with_auth(file: Option<&std::path::Path>) -> Rpc {
        let cfg = RpcConfig {
            id: "self".to_string(),
            auth_domain: Some("realm1".to_string()),
            auth_file: file.map(Into::into),
            ..RpcConfig::default()
        };
        Rpc::new(cfg)
    }

    #[test]
    fn engine_populates_username_on_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "joe:realm1:{}", ha1("joe", "realm1", "secret")).unwrap();
        let mut rpc = engine_with_auth(Some(file.path()));
        let req = request_with_auth(Some(auth_raw("joe", "realm1", "secret")));
        let req = rpc.check_digest_auth(req).expect("handle returned");
        assert_eq!(req.authn.username, "joe");
    }

    #[test]
    fn engine_leaves_username_empty_on_bad_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "joe:realm1:{}", ha1("joe", "realm1", "secret")).unwrap();
        let mut rpc = engine_with_auth(Some(file.path()));
        let req = request_with_auth(Some(auth_raw("joe", "realm1", "wrong")));
        let req = rpc.check_digest_auth(req).expect("handle returned");
        assert!(req.authn.username.is_empty());
    }

    #[test]
    fn missing_credential_file_responds_500_and_consumes_handle() {
        let mut rpc = engine_with_auth(Some(std::path::Path::new("/no/such/file")));
        let req = request_with_auth(Some(auth_raw("joe", "realm1", "secret")));
        assert!(rpc.check_digest_auth(req).is_none());
        // The 500 had no open channel to leave through, so it sits queued.
        assert_eq!(rpc.queue_len(), 1);
    }

    #[test]
    fn realm_mismatch_keeps_handle_without_authenticating() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "joe:other:{}", ha1("joe", "other", "secret")).unwrap();
        let mut rpc = engine_with_auth(Some(file.path()));
        let req = request_with_auth(Some(auth_raw("joe", "other", "secret")));
        let req = rpc.check_digest_auth(req).expect("handle returned");
        assert!(req.authn.username.is_empty());
    }

    #[test]
    fn missing_auth_parts_keep_handle() {
        let mut rpc = engine_with_auth(None);
        let partial = RawValue::from_string(r#"{"realm":"realm1"}"#.to_string()).unwrap();
        let req = request_with_auth(Some(partial));
        assert!(rpc.check_digest_auth(req).is_some());
    }

    #[test]
    fn no_auth_field_keeps_handle() {
        let mut rpc = engine_with_auth(None);
        let req = request_with_auth(None);
        assert!(rpc.check_digest_auth(req).is_some());
    }

    #[test]
    fn already_authenticated_short_circuits() {
        let mut rpc = engine_with_auth(None);
        let mut req = request_with_auth(Some(auth_raw("joe", "realm1", "secret")));
        req.authn.username = "preset".to_string();
        let req = rpc.check_digest_auth(req).expect("handle returned");
        assert_eq!(req.authn.username, "preset");
    }
}
