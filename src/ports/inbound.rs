//! Inbound port. The Telegram update listener (adapter) calls into the application.

use crate::domain::InboundEvent;

/// Receives every update the event source produces.
///
/// Implementations must not block the caller for long: the listener awaits
/// `handle` before pulling the next update.
#[async_trait::async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}
