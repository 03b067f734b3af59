//! Telegram Web App `initData` verification.
//!
//! The platform signs the launch parameters it hands to the mini app:
//!
//! ```text
//! secret = HMAC-SHA256(key = "WebAppData", msg = bot_token)
//! hash   = hex(HMAC-SHA256(key = secret, msg = data_check_string))
//! ```
//!
//! where `data_check_string` is every decoded `key=value` pair except `hash`,
//! sorted by key and joined with `\n`. A credential is accepted only if the
//! recomputed lowercase hex digest equals the supplied `hash` exactly.

use crate::types::Profile;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// Fixed key used to derive the per-bot secret.
const WEB_APP_DATA: &[u8] = b"WebAppData";

/// Reasons a credential is refused. None of them carry partial results.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bot token is configured, so nothing can be verified.
    #[error("no bot token configured")]
    MissingSecret,
    /// The credential has no `hash` field.
    #[error("init data has no hash")]
    MissingHash,
    /// The recomputed hash differs from the supplied one.
    #[error("init data hash mismatch")]
    HashMismatch,
    /// The signed fields carry no `user`.
    #[error("init data has no user")]
    MissingUser,
    /// `user` is not a JSON object with a numeric `id`.
    #[error("invalid user payload: {0}")]
    InvalidUser(#[from] serde_json::Error),
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Result<[u8; 32], hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(msg);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Decodes the credential into a sorted field map.
///
/// Pairs with an empty value are skipped and the first occurrence of a
/// repeated key wins, which is how the platform's reference validators read
/// the query string.
fn parse_fields(init_data: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(init_data.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        fields
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    fields
}

fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verifies `initData` credentials against one bot token.
#[derive(Clone)]
pub struct InitDataVerifier {
    secret: Option<[u8; 32]>,
}

impl std::fmt::Debug for InitDataVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataVerifier")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

impl InitDataVerifier {
    /// Derives the verification secret from `bot_token`.
    ///
    /// A missing or empty token yields a verifier that rejects everything.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley_common::init_data::InitDataVerifier;
    ///
    /// let closed = InitDataVerifier::new(None);
    /// assert!(!closed.is_configured());
    /// assert!(closed.verify("user=%7B%22id%22%3A1%7D&hash=00").is_err());
    /// ```
    #[must_use]
    pub fn new(bot_token: Option<&str>) -> Self {
        let secret = bot_token
            .filter(|t| !t.is_empty())
            .and_then(|t| hmac_sha256(WEB_APP_DATA, t.as_bytes()).ok());
        Self { secret }
    }

    /// Whether a bot token was supplied.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Checks the signature of `init_data` and returns the embedded user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when no token is configured, the `hash` is
    /// missing or wrong, or the `user` field is absent or unparsable.
    pub fn verify(&self, init_data: &str) -> Result<Profile, AuthError> {
        let secret = self.secret.as_ref().ok_or(AuthError::MissingSecret)?;

        let mut fields = parse_fields(init_data);
        let supplied = fields.remove("hash").ok_or(AuthError::MissingHash)?;

        let digest = hmac_sha256(secret, data_check_string(&fields).as_bytes())
            .map_err(|_| AuthError::HashMismatch)?;
        if hex::encode(digest) != supplied {
            return Err(AuthError::HashMismatch);
        }

        let user = fields.get("user").ok_or(AuthError::MissingUser)?;
        Ok(serde_json::from_str(user)?)
    }
}

/// Builds a signed credential from raw (undecoded) `key=value` pairs.
///
/// Produces what the platform would hand the mini app for `bot_token`: the
/// pairs form-encoded in the given order, followed by `hash`. Returns `None`
/// for an empty token.
///
/// # Examples
///
/// ```
/// use parley_common::init_data::{sign, InitDataVerifier};
///
/// let token = "123:abc";
/// let data = sign(token, &[("user", r#"{"id":5,"first_name":"Eve"}"#), ("auth_date", "1")]).unwrap();
/// let profile = InitDataVerifier::new(Some(token)).verify(&data).unwrap();
/// assert_eq!(profile.id.0, 5);
/// ```
#[must_use]
pub fn sign(bot_token: &str, pairs: &[(&str, &str)]) -> Option<String> {
    if bot_token.is_empty() {
        return None;
    }
    let secret = hmac_sha256(WEB_APP_DATA, bot_token.as_bytes()).ok()?;

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.extend_pairs(pairs.iter().copied());
    let encoded = serializer.finish();

    let digest = hmac_sha256(&secret, data_check_string(&parse_fields(&encoded)).as_bytes()).ok()?;
    let mut serializer = form_urlencoded::Serializer::new(encoded);
    serializer.append_pair("hash", &hex::encode(digest));
    Some(serializer.finish())
}
