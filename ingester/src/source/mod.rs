pub mod steam;

use crate::model::ReviewPage;
use async_trait::async_trait;
use ingester_core::Result;

#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Fetch one page of reviews for `app_id`, newest first. Implementations
    /// never retry; callers own the retry policy.
    async fn fetch_page(&self, app_id: &str, cursor: &str) -> Result<ReviewPage>;

    /// Get the source identifier
    fn source_id(&self) -> &str;
}

pub use steam::SteamReviewClient;
