use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::state::AppState;

/// Runs the hold-expiry reaper until `shutdown` flips to true.
pub fn spawn_reaper(state: &AppState, interval: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let reaper = state.reaper.clone();
    let metrics = state.metrics.clone();

    tokio::spawn(async move {
        reaper
            .run(interval, shutdown, move |_report| metrics.record_sweep())
            .await;
        info!("Hold expiry reaper task finished");
    })
}
