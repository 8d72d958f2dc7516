//! Voyager HTTP client implementation.

use std::time::Duration;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, USER_AGENT,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::types::{
    Commentary, CreateShareRequest, MINI_PROFILE_TYPE, MeData, MiniProfile, Normalized, SharePost,
    ShareVariables, VisibilityUnion, extract_share_url,
};
use crate::{Credentials, PostReceipt, Profile, Visibility, VoyagerError};

/// Production Voyager base URL.
pub const DEFAULT_VOYAGER_URL: &str = "https://www.linkedin.com/voyager/api";

/// GraphQL query id for share creation, as used by the LinkedIn web app.
const CREATE_SHARE_QUERY_ID: &str = "voyagerContentcreationDashShares.279996efa5064c01775d5aff003d9377";

/// Error bodies are cut to this many characters before being surfaced.
const MAX_ERROR_BODY_CHARS: usize = 500;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/66.0.3359.181 Safari/537.36";
const NORMALIZED_JSON: &str = "application/vnd.linkedin.normalized+json+2.1";

/// Client for LinkedIn's internal Voyager API.
///
/// The client is stateless with respect to users: every call carries the
/// credentials it acts with.
#[derive(Clone)]
pub struct VoyagerClient {
    http: Client,
    base_url: String,
}

impl VoyagerClient {
    /// Create a client against the given Voyager base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, VoyagerError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(NORMALIZED_JSON));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("x-li-lang", HeaderValue::from_static("en_US"));
        headers.insert("x-restli-protocol-version", HeaderValue::from_static("2.0.0"));

        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Publish a text post.
    #[tracing::instrument(skip(self, credentials, text), fields(len = text.len()))]
    pub async fn create_post(
        &self,
        credentials: &Credentials,
        text: &str,
        visibility: Visibility,
    ) -> Result<PostReceipt, VoyagerError> {
        let url = format!("{}/graphql", self.base_url);

        let body = CreateShareRequest {
            variables: ShareVariables {
                post: SharePost {
                    allowed_commenters_scope: "ALL",
                    intended_share_life_cycle_state: "PUBLISHED",
                    origin: "FEED",
                    visibility_data_union: VisibilityUnion {
                        visibility_type: visibility,
                    },
                    commentary: Commentary {
                        text,
                        attributes_v2: Vec::new(),
                    },
                },
            },
            query_id: CREATE_SHARE_QUERY_ID,
        };

        let response = self
            .http
            .post(&url)
            .query(&[("action", "execute"), ("queryId", CREATE_SHARE_QUERY_ID)])
            .headers(Self::session_headers(credentials)?)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .json(&body)
            .send()
            .await?;

        let envelope: Normalized<serde_json::Value> = self.handle_response(response).await?;
        let post_url = extract_share_url(&envelope.included);

        info!(post_url = ?post_url, "post created");
        Ok(PostReceipt { post_url })
    }

    /// Read the authenticated user's profile.
    #[tracing::instrument(skip_all)]
    pub async fn get_profile(&self, credentials: &Credentials) -> Result<Profile, VoyagerError> {
        let url = format!("{}/me", self.base_url);

        let response = self
            .http
            .get(&url)
            .headers(Self::session_headers(credentials)?)
            .send()
            .await?;

        let envelope: Normalized<MeData> = self.handle_response(response).await?;

        let mut profile = Profile::default();
        if let Some(data) = envelope.data {
            profile.plain_id = data.plain_id;
            profile.premium_subscriber = data.premium_subscriber;
        }

        let mini = envelope
            .included
            .into_iter()
            .find(|item| item.get("$type").and_then(|t| t.as_str()) == Some(MINI_PROFILE_TYPE));

        if let Some(mini) = mini {
            match serde_json::from_value::<MiniProfile>(mini) {
                Ok(mini) => {
                    profile.first_name = mini.first_name;
                    profile.last_name = mini.last_name;
                    profile.occupation = mini.occupation;
                    profile.public_identifier = mini.public_identifier;
                    profile.entity_urn = mini.entity_urn;
                    profile.object_urn = mini.object_urn;
                }
                Err(e) => debug!(error = %e, "could not decode mini profile"),
            }
        }

        Ok(profile)
    }

    /// Per-request headers carrying the user's session.
    fn session_headers(credentials: &Credentials) -> Result<HeaderMap, VoyagerError> {
        let invalid = |what: &str| {
            VoyagerError::InvalidCredentials(format!(
                "{} contains characters not allowed in a header",
                what
            ))
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&credentials.cookie_header()).map_err(|_| invalid("cookie"))?,
        );
        headers.insert(
            "csrf-token",
            HeaderValue::from_str(credentials.csrf_token()).map_err(|_| invalid("csrf token"))?,
        );
        Ok(headers)
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, VoyagerError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            warn!(retry_after_secs = ?retry_after_secs, "rate limited by Voyager");
            return Err(VoyagerError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(status = status.as_u16(), body = %body, "Voyager request failed");

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(VoyagerError::Auth {
                    status: status.as_u16(),
                    message: body,
                });
            }

            return Err(VoyagerError::InvalidResponse {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
