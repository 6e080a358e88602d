use chrono::Utc;
use shared::bus::Subscription;
use shared::logger::log_record;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

use crate::engine::DispatchEngine;

const EVENT_POLL: Duration = Duration::from_millis(200);

/// Tick the engine every `period` until `shutdown` resolves. Returns the
/// number of ticks run.
pub async fn run_ticks<F>(engine: Arc<DispatchEngine>, period: Duration, shutdown: F) -> u64
where
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    let mut ticks = 0u64;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                engine.tick(Utc::now());
                ticks += 1;
            }
        }
    }

    info!(ticks, "Tick loop stopped");
    ticks
}

/// Log every bus event on a background thread until `stop` is set.
pub fn spawn_event_logger(mut subscription: Subscription, stop: Arc<AtomicBool>) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut logged = 0;
        while !stop.load(Ordering::Relaxed) {
            if let Some(envelope) = subscription.recv_timeout(EVENT_POLL) {
                info!(
                    source = ?envelope.source,
                    sequence = envelope.sequence,
                    kind = ?envelope.event.kind(),
                    "Event"
                );
                log_record("Event payload", &envelope);
                logged += 1;
            }
        }
        logged
    })
}
