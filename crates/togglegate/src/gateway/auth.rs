//! Caller authentication
//!
//! Keys are stored as BLAKE3 digests and compared with `subtle`, so a check
//! takes the same time whichever key matches and wherever a mismatch occurs.
//! The client key set lives behind an `ArcSwap` and can be replaced while
//! requests are in flight; each check sees one complete set.

use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use subtle::{Choice, ConstantTimeEq};

use togglegate_core::{GatewayError, GatewayResult};

type KeyDigest = [u8; 32];

#[inline]
fn hash_key(key: &str) -> KeyDigest {
    blake3::hash(key.as_bytes()).into()
}

fn digests<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<KeyDigest> {
    keys.into_iter()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(hash_key)
        .collect()
}

/// Scan every digest without exiting early
fn contains(set: &[KeyDigest], candidate: &KeyDigest) -> bool {
    set.iter()
        .fold(Choice::from(0), |found, key| found | key.ct_eq(candidate))
        .into()
}

/// Which key set accepted a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// Front-end application key
    Client,
    /// Privileged server-side token
    Server,
}

/// Endpoint access levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Client keys only
    ClientKey,
    /// Server-side tokens only
    ServerToken,
    /// Either set
    Any,
}

/// Allow-lists of caller tokens
pub struct KeyStore {
    client_keys: ArcSwap<Vec<KeyDigest>>,
    server_tokens: Vec<KeyDigest>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("client_keys", &self.client_keys.load().len())
            .field("server_tokens", &self.server_tokens.len())
            .finish()
    }
}

impl KeyStore {
    pub fn new(client_keys: &[SecretString], server_tokens: &[SecretString]) -> Self {
        Self {
            client_keys: ArcSwap::from_pointee(digests(
                client_keys.iter().map(ExposeSecret::expose_secret),
            )),
            server_tokens: digests(server_tokens.iter().map(ExposeSecret::expose_secret)),
        }
    }

    /// Replace the client key set atomically
    pub fn set_client_keys<S: AsRef<str>>(&self, keys: &[S]) {
        self.client_keys
            .store(Arc::new(digests(keys.iter().map(AsRef::as_ref))));
    }

    pub fn client_key_count(&self) -> usize {
        self.client_keys.load().len()
    }

    /// Check a token against the sets `access` allows
    ///
    /// Both sets are scanned regardless of `access` so the time taken does not
    /// depend on which one matched.
    pub fn check(&self, token: &str, access: Access) -> Option<Caller> {
        let digest = hash_key(token);
        let client = contains(&self.client_keys.load(), &digest);
        let server = contains(&self.server_tokens, &digest);

        match access {
            Access::ClientKey if client => Some(Caller::Client),
            Access::ServerToken if server => Some(Caller::Server),
            Access::Any if client => Some(Caller::Client),
            Access::Any if server => Some(Caller::Server),
            _ => None,
        }
    }

    /// Authenticate a request from its headers
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unauthorized` if the header is missing or the
    /// token is not in an allowed set.
    pub fn authorize(
        &self,
        headers: &HeaderMap,
        header_name: &str,
        access: Access,
    ) -> GatewayResult<Caller> {
        extract_token(headers, header_name)
            .and_then(|token| self.check(&token, access))
            .ok_or(GatewayError::Unauthorized)
    }
}

/// Read the caller token from `header_name`
///
/// The value is taken as the raw token, except `Basic` credentials whose
/// password part is used instead. An optional `Bearer ` prefix is stripped.
pub fn extract_token(headers: &HeaderMap, header_name: &str) -> Option<String> {
    let raw = headers.get(header_name)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(encoded) = strip_scheme(raw, "Basic") {
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let credentials = String::from_utf8(decoded).ok()?;
        let (_, password) = credentials.split_once(':')?;
        return (!password.is_empty()).then(|| password.to_string());
    }

    let token = strip_scheme(raw, "Bearer").unwrap_or(raw);
    Some(token.trim().to_string())
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (prefix, rest) = value.split_at_checked(scheme.len())?;
    (prefix.eq_ignore_ascii_case(scheme) && rest.starts_with(' ')).then(|| &rest[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn store() -> KeyStore {
        KeyStore::new(
            &[SecretString::from("client-a".to_string())],
            &[SecretString::from("server-x".to_string())],
        )
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_access_levels() {
        let keys = store();
        assert_eq!(keys.check("client-a", Access::ClientKey), Some(Caller::Client));
        assert_eq!(keys.check("client-a", Access::ServerToken), None);
        assert_eq!(keys.check("server-x", Access::ServerToken), Some(Caller::Server));
        assert_eq!(keys.check("server-x", Access::ClientKey), None);
        assert_eq!(keys.check("server-x", Access::Any), Some(Caller::Server));
        assert_eq!(keys.check("nope", Access::Any), None);
    }

    #[test]
    fn test_raw_token() {
        assert_eq!(
            extract_token(&headers("client-a"), "authorization").as_deref(),
            Some("client-a")
        );
    }

    #[test]
    fn test_basic_auth_uses_password() {
        let encoded = STANDARD.encode("anything:client-a");
        let value = format!("Basic {encoded}");
        assert_eq!(
            extract_token(&headers(&value), "authorization").as_deref(),
            Some("client-a")
        );
        assert!(store().authorize(&headers(&value), "authorization", Access::ClientKey).is_ok());
    }

    #[test]
    fn test_basic_auth_without_password() {
        let value = format!("Basic {}", STANDARD.encode("user:"));
        assert_eq!(extract_token(&headers(&value), "authorization"), None);
    }

    #[test]
    fn test_bearer_prefix_stripped() {
        assert_eq!(
            extract_token(&headers("Bearer client-a"), "authorization").as_deref(),
            Some("client-a")
        );
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let err = store()
            .authorize(&HeaderMap::new(), "authorization", Access::Any)
            .unwrap_err();
        assert_eq!(err, GatewayError::Unauthorized);
    }

    #[test]
    fn test_custom_header_name() {
        let mut map = HeaderMap::new();
        map.insert("x-proxy-key", HeaderValue::from_static("client-a"));
        assert!(store().authorize(&map, "x-proxy-key", Access::ClientKey).is_ok());
        assert!(store().authorize(&map, "authorization", Access::ClientKey).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_every_configured_key_is_accepted(
            keys in proptest::collection::vec("[a-zA-Z0-9:._-]{1,40}", 1..8),
            pick in 0usize..8,
        ) {
            let store = KeyStore::new(&[], &[]);
            store.set_client_keys(&keys);
            let key = &keys[pick % keys.len()];
            proptest::prop_assert_eq!(store.check(key, Access::ClientKey), Some(Caller::Client));
            proptest::prop_assert_eq!(store.check(key, Access::ServerToken), None);
        }

        #[test]
        fn prop_basic_password_round_trips(
            user in "[a-z]{0,12}",
            password in "[a-zA-Z0-9:._-]{1,40}",
        ) {
            let value = format!("Basic {}", STANDARD.encode(format!("{user}:{password}")));
            proptest::prop_assert_eq!(
                extract_token(&headers(&value), "authorization"),
                Some(password)
            );
        }
    }

    #[test]
    fn test_set_client_keys_replaces_set() {
        let keys = store();
        keys.set_client_keys(&["client-b", "client-c"]);
        assert_eq!(keys.client_key_count(), 2);
        assert_eq!(keys.check("client-a", Access::ClientKey), None);
        assert_eq!(keys.check("client-c", Access::ClientKey), Some(Caller::Client));
        assert_eq!(keys.check("server-x", Access::ServerToken), Some(Caller::Server));
    }
}
