//! The interface the scheduler and web layer post through.

use async_trait::async_trait;

use crate::{Credentials, PostReceipt, Profile, Visibility, VoyagerClient, VoyagerError};

/// A remote service that can publish posts and read profiles for a user.
#[async_trait]
pub trait PostingService: Send + Sync {
    /// Publish `text` as the user identified by `credentials`.
    async fn create_post(
        &self,
        credentials: &Credentials,
        text: &str,
        visibility: Visibility,
    ) -> Result<PostReceipt, VoyagerError>;

    /// Read the profile of the user identified by `credentials`.
    async fn get_profile(&self, credentials: &Credentials) -> Result<Profile, VoyagerError>;
}

#[async_trait]
impl PostingService for VoyagerClient {
    async fn create_post(
        &self,
        credentials: &Credentials,
        text: &str,
        visibility: Visibility,
    ) -> Result<PostReceipt, VoyagerError> {
        VoyagerClient::create_post(self, credentials, text, visibility).await
    }

    async fn get_profile(&self, credentials: &Credentials) -> Result<Profile, VoyagerError> {
        VoyagerClient::get_profile(self, credentials).await
    }
}
