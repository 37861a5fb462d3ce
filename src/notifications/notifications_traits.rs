use async_trait::async_trait;
use log::info;

use super::notifications_model::NotificationEvent;
use crate::errors::Result;

/// Delivery channel for borrower and officer notifications (SMS, in-app).
///
/// Implementations must tolerate being called from a fire-and-forget task;
/// errors are logged by the dispatcher and never propagate to the ledger path.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> Result<()>;
}

/// Default notifier that only logs. The SMS/in-app gateway lives outside
/// this crate and plugs in through the `Notifier` trait.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent) -> Result<()> {
        info!("notification: {:?}", event);
        Ok(())
    }
}
