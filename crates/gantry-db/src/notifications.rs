//! Pub/sub notifications between orchestrator instances.
//!
//! Notifications carry no payload; they only wake listeners. Postgres
//! `LISTEN`/`NOTIFY` is used across processes, and an in-memory bus covers
//! single-process deployments and tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::DbResult;

/// Published by an instance that is shutting down so a peer takes over.
pub const ATC_SHUTDOWN: &str = "atc_shutdown";

/// Published whenever a build starts running.
pub const BUILD_STARTED: &str = "build_started";

/// A live subscription to one channel. Dropping it stops listening.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn spawn<F>(channel: &str, forward: impl FnOnce(mpsc::Sender<bool>) -> F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Pending wake-ups coalesce: one queued notification is enough.
        let (tx, receiver) = mpsc::channel(1);
        Self {
            channel: channel.to_string(),
            receiver,
            task: tokio::spawn(forward(tx)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next notification.
    ///
    /// Yields `true` for a delivered notification and `false` when the
    /// underlying connection was lost, after which notifications may have
    /// been missed. `None` once the subscription can no longer deliver.
    pub async fn recv(&mut self) -> Option<bool> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Returns false once the subscriber has gone away.
fn deliver(tx: &mpsc::Sender<bool>, healthy: bool) -> bool {
    !matches!(tx.try_send(healthy), Err(TrySendError::Closed(_)))
}

#[async_trait]
pub trait Notifications: Send + Sync {
    async fn listen(&self, channel: &str) -> DbResult<Subscription>;

    async fn notify(&self, channel: &str) -> DbResult<()>;
}

/// PostgreSQL `LISTEN`/`NOTIFY` notifications.
pub struct PgNotifications {
    pool: PgPool,
}

impl PgNotifications {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifications for PgNotifications {
    async fn listen(&self, channel: &str) -> DbResult<Subscription> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        debug!(channel, "listening");

        let name = channel.to_string();
        Ok(Subscription::spawn(channel, move |tx| async move {
            loop {
                let healthy = match listener.recv().await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(channel = %name, error = %e, "notification listener lost its connection");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        false
                    }
                };

                if !deliver(&tx, healthy) {
                    break;
                }
            }
        }))
    }

    async fn notify(&self, channel: &str) -> DbResult<()> {
        sqlx::query("SELECT pg_notify($1, '')")
            .bind(channel)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Notifications within a single process.
#[derive(Debug, Default)]
pub struct InMemoryNotifications {
    channels: DashMap<String, broadcast::Sender<()>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<()> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }
}

#[async_trait]
impl Notifications for InMemoryNotifications {
    async fn listen(&self, channel: &str) -> DbResult<Subscription> {
        let mut rx = self.sender(channel).subscribe();

        Ok(Subscription::spawn(channel, move |tx| async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !deliver(&tx, true) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn notify(&self, channel: &str) -> DbResult<()> {
        // Nobody listening is not an error.
        let _ = self.sender(channel).send(());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_delivers_to_listeners() {
        let bus = InMemoryNotifications::new();
        let mut first = bus.listen(BUILD_STARTED).await.unwrap();
        let mut second = bus.listen(BUILD_STARTED).await.unwrap();

        bus.notify(BUILD_STARTED).await.unwrap();

        assert_eq!(first.recv().await, Some(true));
        assert_eq!(second.recv().await, Some(true));
        assert_eq!(first.channel(), BUILD_STARTED);
    }

    #[tokio::test]
    async fn test_in_memory_channels_are_separate() {
        let bus = InMemoryNotifications::new();
        let mut started = bus.listen(BUILD_STARTED).await.unwrap();
        let mut shutdown = bus.listen(ATC_SHUTDOWN).await.unwrap();

        bus.notify(ATC_SHUTDOWN).await.unwrap();

        assert_eq!(shutdown.recv().await, Some(true));
        tokio::task::yield_now().await;
        assert!(started.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_without_listeners() {
        let bus = InMemoryNotifications::new();
        bus.notify(ATC_SHUTDOWN).await.unwrap();

        let subscription = bus.listen(ATC_SHUTDOWN).await.unwrap();
        drop(subscription);
        bus.notify(ATC_SHUTDOWN).await.unwrap();
    }
}
