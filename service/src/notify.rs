//! Outbound notifications after lifecycle events.
//!
//! Delivery happens after the lifecycle transaction has committed and never
//! rolls it back. A failed notification surfaces as a `warning` on the
//! response.

use async_trait::async_trait;
use intake_engine::FormInstance;

use crate::lifecycle::SubmissionReceipt;

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A new invitation is ready to be sent to the client.
    async fn invitation_created(
        &self,
        instance: &FormInstance,
        form_url: &str,
    ) -> Result<(), NotifyError>;

    /// The client submitted; the practitioner should hear about it.
    async fn submission_received(&self, receipt: &SubmissionReceipt) -> Result<(), NotifyError>;
}

/// Records notifications in the service log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn invitation_created(
        &self,
        instance: &FormInstance,
        _form_url: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            instance_id = %instance.id,
            owner_id = %instance.owner_id,
            expires_at = %instance.expires_at,
            "invitation ready for delivery"
        );
        Ok(())
    }

    async fn submission_received(&self, receipt: &SubmissionReceipt) -> Result<(), NotifyError> {
        tracing::info!(
            instance_id = %receipt.instance_id,
            owner_id = %receipt.owner_id,
            submission_id = %receipt.submission_id,
            "submission notification queued"
        );
        Ok(())
    }
}
