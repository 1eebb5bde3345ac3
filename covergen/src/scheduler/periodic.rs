//! Generic periodic trigger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;

/// Work run on every tick of [`spawn_periodic`].
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn tick(&self) -> Result<()>;
}

/// Run `task` every `period` until `cancellation_token` fires.
///
/// The first tick fires immediately. A tick that overruns the period delays
/// the next one instead of bursting; errors are logged and the loop goes on.
pub fn spawn_periodic<T: PeriodicTask>(
    task: Arc<T>,
    period: Duration,
    cancellation_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("{} started (interval: {:?})", task.name(), period);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("{} shutting down", task.name());
                    break;
                }
                _ = ticker.tick() => {
                    debug!("{} tick", task.name());
                    // A tick in progress is finished before shutdown is observed.
                    if let Err(e) = task.tick().await {
                        error!("{} cycle failed: {}", task.name(), e);
                    }
                }
            }
        }
    })
}
