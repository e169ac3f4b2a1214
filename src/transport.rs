use crate::embed::WebhookPayload;
use crate::error::DeliveryError;
use async_trait::async_trait;

/// Outbound leg of the webhook handler: delivers one packed payload per
/// call.
///
/// The handler's worker calls `post` from its own runtime, one request at a
/// time, and wraps every call in the configured request timeout. The
/// production implementation is [`crate::discord::DiscordTransport`]; tests
/// substitute a recording mock.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Send a single payload.
    ///
    /// **Returns**
    /// - `Ok(())` if the remote side accepted the payload (any 2xx status).
    /// - `Err(..)` on network failure, non-2xx status or rate limiting. The
    ///   handler keeps the payload's entries buffered and retries on the next
    ///   natural trigger.
    async fn post(&self, payload: &WebhookPayload) -> Result<(), DeliveryError>;
}
