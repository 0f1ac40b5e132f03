//! Watches the backing store for rule changes.
//!
//! One long-lived LISTEN subscription per engine instance. The listener only
//! signals "reload requested" on a bounded channel; a dedicated worker owns
//! the actual load-and-publish, so notification delivery is never coupled to
//! query/compile work and a burst of notifications collapses into one pending
//! reload. While the subscription is down the last published snapshot keeps
//! serving; reconnects use capped exponential backoff off the decision path.

use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::rules::registry::SnapshotRegistry;
use crate::settings::Database as DatabaseSettings;
use crate::store::SnapshotStore;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

pub struct ChangeWatcher {
    tasks: Vec<JoinHandle<()>>,
}

impl ChangeWatcher {
    /// Spawn the notification listener, the reload worker, and (when
    /// configured) the periodic resync ticker.
    pub fn spawn(
        cfg: &DatabaseSettings,
        store: SnapshotStore,
        registry: Arc<SnapshotRegistry>,
    ) -> Self {
        // Capacity 1: a full queue means a reload is already pending and the
        // next one would observe the same rows anyway.
        let (reload_tx, reload_rx) = mpsc::channel::<()>(1);

        let mut tasks = vec![
            tokio::spawn(reload_worker(reload_rx, store, registry)),
            tokio::spawn(listen_loop(
                cfg.url.clone(),
                cfg.notify_channel.clone(),
                reload_tx.clone(),
            )),
        ];

        if cfg.resync_interval_secs > 0 {
            tasks.push(tokio::spawn(resync_ticker(
                Duration::from_secs(cfg.resync_interval_secs),
                reload_tx,
            )));
        }

        Self { tasks }
    }

    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Applies reload requests one at a time. A failed reload keeps the
/// last-known-good snapshot in place and never tears anything down.
async fn reload_worker(
    mut reload_rx: mpsc::Receiver<()>,
    store: SnapshotStore,
    registry: Arc<SnapshotRegistry>,
) {
    while reload_rx.recv().await.is_some() {
        match store.load().await {
            Ok(snapshot) => registry.publish(snapshot),
            Err(err) => {
                tracing::error!(%err, "Rule reload failed, keeping the last good snapshot");
            }
        }
    }
}

async fn listen_loop(url: String, channel: String, reload_tx: mpsc::Sender<()>) {
    let mut backoff = BACKOFF_INITIAL;
    loop {
        let mut listener = match PgListener::connect(&url).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(%err, "Could not open the notification connection");
                sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        if let Err(err) = listener.listen(&channel).await {
            tracing::warn!(%err, channel = %channel, "LISTEN failed");
            sleep(backoff).await;
            backoff = next_backoff(backoff);
            continue;
        }

        tracing::info!(channel = %channel, "Subscribed to rule change notifications");
        backoff = BACKOFF_INITIAL;

        // The rules changed while we were disconnected, or this is the first
        // subscription right after bootstrap; either way a resync is cheap.
        let _ = reload_tx.try_send(());

        loop {
            let outcome = listener.try_recv().await;
            match step_for(&outcome) {
                ListenStep::Reload => {
                    match &outcome {
                        Ok(Some(notification)) => tracing::debug!(
                            payload = notification.payload(),
                            "Rule change notification received"
                        ),
                        _ => tracing::warn!(
                            channel = %channel,
                            "Notification connection was re-established, forcing a resync"
                        ),
                    }
                    let _ = reload_tx.try_send(());
                }
                ListenStep::Reconnect => {
                    if let Err(err) = &outcome {
                        tracing::warn!(%err, "Notification connection lost, reconnecting");
                    }
                    break;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ListenStep {
    /// Signal a reload and keep receiving.
    Reload,
    /// Tear the listener down and reconnect with backoff.
    Reconnect,
}

/// Maps one `try_recv` outcome onto the loop's next step. `Ok(None)` means
/// sqlx quietly dropped and re-established the connection under us; any
/// notification sent during the gap is gone, so it forces a reload exactly
/// like a delivered one.
fn step_for<T>(outcome: &Result<Option<T>, sqlx::Error>) -> ListenStep {
    match outcome {
        Ok(_) => ListenStep::Reload,
        Err(_) => ListenStep::Reconnect,
    }
}

async fn resync_ticker(interval: Duration, reload_tx: mpsc::Sender<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // first tick completes immediately
    loop {
        ticker.tick().await;
        tracing::debug!("Periodic rule resync");
        let _ = reload_tx.try_send(());
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = BACKOFF_INITIAL;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_silent_reconnect_triggers_reload() {
        // A delivered notification and a silent in-recv reconnect both
        // warrant a reload; only a hard error rebuilds the subscription.
        assert_eq!(step_for(&Ok::<_, sqlx::Error>(Some(()))), ListenStep::Reload);
        assert_eq!(step_for(&Ok::<Option<()>, _>(None)), ListenStep::Reload);
        assert_eq!(
            step_for(&Err::<Option<()>, _>(sqlx::Error::PoolClosed)),
            ListenStep::Reconnect
        );
    }

    #[tokio::test]
    async fn test_pending_reloads_collapse() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        // A burst of notifications while a reload is pending queues one.
        for _ in 0..5 {
            let _ = tx.try_send(());
        }
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
