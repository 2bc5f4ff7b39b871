use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RecorderLivenessConfig;
use crate::context::{ProcessGroupContexts, SweepResult};

/// Barre periódicamente los recorders de todos los process groups.
pub async fn monitor_recorders(
    contexts: Arc<ProcessGroupContexts>,
    config: RecorderLivenessConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("monitor de recorders detenido");
                return;
            }
            _ = tokio::time::sleep(config.sweep_interval) => {}
        }

        let total = sweep_once(&contexts, &config, Instant::now());
        if total.marked_dead > 0 || total.evicted > 0 {
            info!(
                marked_dead = total.marked_dead,
                evicted = total.evicted,
                "barrido de recorders"
            );
        }
    }
}

pub fn sweep_once(
    contexts: &ProcessGroupContexts,
    config: &RecorderLivenessConfig,
    now: Instant,
) -> SweepResult {
    let mut total = SweepResult::default();
    for ctx in contexts.all() {
        let r = ctx.sweep_recorders(now, config.defunct_threshold, config.eviction_threshold);
        total.marked_dead += r.marked_dead;
        total.evicted += r.evicted;
    }
    total
}
