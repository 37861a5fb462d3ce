// Module declarations
pub(crate) mod notifications_model;
pub(crate) mod notifications_traits;

use log::warn;
use std::sync::Arc;

// Re-export the public interface
pub use notifications_model::NotificationEvent;
pub use notifications_traits::{LogNotifier, Notifier};

/// Dispatches notification events after a ledger commit.
///
/// Runs on the current tokio runtime when one exists, falling back to an
/// inline blocking send otherwise. Failures are logged and swallowed; the
/// ledger write has already committed and must not be affected.
pub fn dispatch(notifier: Arc<dyn Notifier>, events: Vec<NotificationEvent>) {
    if events.is_empty() {
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                for event in events {
                    if let Err(e) = notifier.notify(event).await {
                        warn!("Notification delivery failed: {}", e);
                    }
                }
            });
        }
        Err(_) => {
            for event in events {
                if let Err(e) = futures::executor::block_on(notifier.notify(event)) {
                    warn!("Notification delivery failed: {}", e);
                }
            }
        }
    }
}
