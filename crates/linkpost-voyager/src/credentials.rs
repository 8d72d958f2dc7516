//! Session credentials.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cookie holding the LinkedIn session token.
pub const SESSION_COOKIE: &str = "li_at";

/// Cookie whose value doubles as the CSRF token.
pub const CSRF_COOKIE: &str = "JSESSIONID";

/// Errors produced while extracting credentials from a cookie bundle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    /// The bundle was not a JSON object.
    #[error("credential bundle must be an object")]
    NotAnObject,

    /// A required cookie was absent or empty.
    #[error("missing {0} cookie")]
    Missing(&'static str),
}

/// The minimal cookie pair needed to act on behalf of a user.
///
/// Serializes to exactly `{"li_at": …, "JSESSIONID": …}`; nothing else from
/// the browser session is ever kept. Blank tokens are rejected on
/// construction and on deserialization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCredentials")]
pub struct Credentials {
    #[serde(rename = "li_at")]
    li_at: String,
    #[serde(rename = "JSESSIONID")]
    jsessionid: String,
}

#[derive(Deserialize)]
struct RawCredentials {
    #[serde(rename = "li_at")]
    li_at: String,
    #[serde(rename = "JSESSIONID")]
    jsessionid: String,
}

impl TryFrom<RawCredentials> for Credentials {
    type Error = CredentialsError;

    fn try_from(raw: RawCredentials) -> Result<Self, Self::Error> {
        Self::new(raw.li_at, raw.jsessionid)
    }
}

impl Credentials {
    /// Build credentials from the two tokens, rejecting blank values.
    pub fn new(
        li_at: impl Into<String>,
        jsessionid: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let li_at = li_at.into();
        let jsessionid = jsessionid.into();

        if li_at.trim().is_empty() {
            return Err(CredentialsError::Missing(SESSION_COOKIE));
        }
        if jsessionid.trim().is_empty() {
            return Err(CredentialsError::Missing(CSRF_COOKIE));
        }

        Ok(Self { li_at, jsessionid })
    }

    /// Extract the two tokens from an arbitrary cookie bundle.
    ///
    /// Any other cookies in the bundle are discarded.
    pub fn from_bundle(bundle: &serde_json::Value) -> Result<Self, CredentialsError> {
        let map = bundle.as_object().ok_or(CredentialsError::NotAnObject)?;

        let token = |name: &'static str| {
            map.get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .ok_or(CredentialsError::Missing(name))
        };

        Self::new(token(SESSION_COOKIE)?, token(CSRF_COOKIE)?)
    }

    /// Parse credentials from their stored JSON form.
    pub fn from_stored(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to the stored JSON form.
    pub fn to_stored(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The session token.
    pub fn li_at(&self) -> &str {
        &self.li_at
    }

    /// CSRF token: the JSESSIONID value without surrounding quotes.
    pub fn csrf_token(&self) -> &str {
        self.jsessionid.trim_matches('"')
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        format!(
            "{}={}; {}={}",
            SESSION_COOKIE, self.li_at, CSRF_COOKIE, self.jsessionid
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("li_at", &"<redacted>")
            .field("jsessionid", &"<redacted>")
            .finish()
    }
}
