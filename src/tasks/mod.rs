//! Background tasks. Call `spawn_all` once during startup.

use crate::config::OrchestratorConfig;
use crate::services::GenerationService;

/// Spawn all background tasks.
///
/// The stale-job sweep is the only one; it is skipped when
/// `processing_timeout_secs` is 0. Detaches via `tokio::spawn`.
pub fn spawn_all(generation_service: GenerationService, settings: &OrchestratorConfig) {
    if settings.processing_timeout_secs <= 0 {
        log::info!("Stale generation sweep disabled");
        return;
    }

    let timeout = chrono::Duration::seconds(settings.processing_timeout_secs);
    let interval = std::time::Duration::from_secs(settings.sweep_interval_secs.max(1));
    let svc = generation_service;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match svc.sweep_stale(timeout).await {
                Ok(report) if report.timed_out > 0 => {
                    log::warn!("Sweep timed out {} generation records", report.timed_out)
                }
                Ok(_) => {}
                Err(e) => log::error!("Failed to sweep stale generations: {e:?}"),
            }
        }
    });
}
