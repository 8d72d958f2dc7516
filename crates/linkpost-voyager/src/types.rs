//! Voyager request and response types.

use serde::{Deserialize, Serialize};

/// Who can see a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// Public.
    #[default]
    Anyone,
    /// First-degree connections only.
    Connections,
}

/// Result of a successful post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    /// Share URL of the new post, when Voyager returned one.
    pub post_url: Option<String>,
}

/// The authenticated user's profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub plain_id: Option<i64>,
    pub premium_subscriber: Option<bool>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub occupation: Option<String>,
    pub public_identifier: Option<String>,
    pub entity_urn: Option<String>,
    pub object_urn: Option<String>,
}

impl Profile {
    /// A profile with a member id means the session is live.
    pub fn is_authenticated(&self) -> bool {
        self.plain_id.is_some()
    }
}

pub(crate) const MINI_PROFILE_TYPE: &str = "com.linkedin.voyager.identity.shared.MiniProfile";
pub(crate) const SOCIAL_CONTENT_TYPE: &str = "com.linkedin.voyager.dash.social.SocialContent";
pub(crate) const FEED_UPDATE_TYPE: &str = "com.linkedin.voyager.dash.feed.Update";

/// Normalized Voyager envelope: a primary `data` object plus `included` entities.
#[derive(Debug, Deserialize)]
pub(crate) struct Normalized<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub included: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MeData {
    pub plain_id: Option<i64>,
    pub premium_subscriber: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MiniProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub occupation: Option<String>,
    pub public_identifier: Option<String>,
    pub entity_urn: Option<String>,
    pub object_urn: Option<String>,
}

/// Body of the share-creation GraphQL call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateShareRequest<'a> {
    pub variables: ShareVariables<'a>,
    pub query_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ShareVariables<'a> {
    pub post: SharePost<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SharePost<'a> {
    pub allowed_commenters_scope: &'a str,
    pub intended_share_life_cycle_state: &'a str,
    pub origin: &'a str,
    pub visibility_data_union: VisibilityUnion,
    pub commentary: Commentary<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VisibilityUnion {
    pub visibility_type: Visibility,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Commentary<'a> {
    pub text: &'a str,
    pub attributes_v2: Vec<serde_json::Value>,
}

/// Find the share URL among the entities included in a share response.
pub(crate) fn extract_share_url(included: &[serde_json::Value]) -> Option<String> {
    for item in included {
        match item.get("$type").and_then(|t| t.as_str()) {
            Some(SOCIAL_CONTENT_TYPE) => {
                return item.get("shareUrl").and_then(|u| u.as_str()).map(String::from);
            }
            Some(FEED_UPDATE_TYPE) => {
                return item
                    .get("socialContent")
                    .and_then(|c| c.get("shareUrl"))
                    .and_then(|u| u.as_str())
                    .map(String::from);
            }
            _ => {}
        }
    }
    None
}
