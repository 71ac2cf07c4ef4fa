use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::coordinator::TodayFeedService;
use crate::publishers::PublisherMap;
use crate::util::catch_task_panic;

/// Force a feed refresh whenever publishers or their preferences change.
///
/// Each notification spawns a detached `update(true)` whose result is
/// discarded; concurrent forced updates coalesce in the coordinator. A lagged
/// receiver counts as one change. The task ends when the channel closes or
/// the service is dropped.
pub(crate) fn spawn_publishers_listener(
    service: &TodayFeedService,
    mut changes: broadcast::Receiver<PublisherMap>,
) -> JoinHandle<()> {
    let weak = service.downgrade();

    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(publishers) => {
                    tracing::debug!(publishers = publishers.len(), "Publishers changed, refreshing feed");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Publisher notifications lagged, refreshing feed once");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Publisher change channel closed, stopping listener");
                    break;
                }
            }

            let Some(service) = weak.upgrade() else {
                tracing::debug!("Feed service dropped, stopping publisher listener");
                break;
            };

            tokio::spawn(async move {
                if let Err(panic_msg) = catch_task_panic(service.update(true)).await {
                    tracing::error!(
                        task = "publishers_listener",
                        error = %panic_msg,
                        "Forced feed refresh panicked"
                    );
                }
            });
        }
    })
}
