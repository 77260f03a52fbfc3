//! Directory watcher
//!
//! Turns a one-shot children watch into a restartable sequence of snapshots:
//! every delivered snapshot re-arms the watch, and failures are reported on a
//! side channel before the loop backs off and retries.

use crate::common::{Error, Result};
use crate::coordination::client::CoordinationClient;
use crate::coordination::store::WatchEvent;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay before re-arming a watch that failed
pub const WATCH_RETRY_BACKOFF: Duration = Duration::from_secs(5);

const ERROR_CHANNEL_CAPACITY: usize = 16;

pub struct DirectoryWatcher {
    path: String,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    children: Option<mpsc::Receiver<Vec<String>>>,
    errors: Option<mpsc::Receiver<Error>>,
}

impl DirectoryWatcher {
    pub(crate) fn spawn(client: CoordinationClient, path: String, retry: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        // Capacity 1: the loop blocks until the consumer takes each snapshot
        let (children_tx, children_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let task = tokio::spawn(watch_loop(
            client,
            path.clone(),
            retry,
            stop_rx,
            children_tx,
            errors_tx,
        ));

        Self {
            path,
            stop: stop_tx,
            task: Some(task),
            children: Some(children_rx),
            errors: Some(errors_rx),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next child-name snapshot; `None` once the watcher is closed
    /// (or the snapshot receiver was taken).
    pub async fn next_snapshot(&mut self) -> Option<Vec<String>> {
        self.children.as_mut()?.recv().await
    }

    /// Next watch error; `None` once the watcher is closed
    /// (or the error receiver was taken).
    pub async fn next_error(&mut self) -> Option<Error> {
        self.errors.as_mut()?.recv().await
    }

    /// Hand the snapshot sequence to another task.
    pub fn take_children(&mut self) -> Option<mpsc::Receiver<Vec<String>>> {
        self.children.take()
    }

    /// Hand the error sequence to another task.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.errors.take()
    }

    /// Stop the loop and wait for it to exit. Both sequences end after any
    /// already-buffered items. Idempotent.
    pub async fn close(&mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(path = %self.path, error = %e, "Watch loop ended abnormally");
            }
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

fn report(errors: &mpsc::Sender<Error>, path: &str, reason: String) {
    let err = Error::Watch {
        path: path.to_string(),
        reason,
    };
    if let Err(mpsc::error::TrySendError::Full(err)) = errors.try_send(err) {
        warn!(path = %path, error = %err, "Watch error channel full, dropping error");
    }
}

async fn watch_loop(
    client: CoordinationClient,
    path: String,
    retry: Duration,
    mut stop: watch::Receiver<bool>,
    children: mpsc::Sender<Vec<String>>,
    errors: mpsc::Sender<Error>,
) {
    info!(path = %path, "Watching directory");
    loop {
        if *stop.borrow() {
            break;
        }

        let armed: Result<_> = tokio::select! {
            _ = stop.changed() => break,
            armed = client.watch_children_once(&path) => armed,
        };
        let (snapshot, trigger) = match armed {
            Ok(armed) => armed,
            Err(e) => {
                error!(path = %path, error = %e, "Watch failed, retrying in {:?}", retry);
                report(&errors, &path, e.to_string());
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(retry) => continue,
                }
            }
        };

        tokio::select! {
            _ = stop.changed() => break,
            sent = children.send(snapshot) => {
                if sent.is_err() {
                    debug!(path = %path, "Snapshot receiver dropped");
                    break;
                }
            }
        }

        tokio::select! {
            _ = stop.changed() => break,
            event = trigger => match event {
                Ok(WatchEvent::Failed(reason)) => {
                    error!(path = %path, reason = %reason, "Watch event error");
                    report(&errors, &path, reason);
                }
                Ok(event) => debug!(path = %path, ?event, "Watch fired"),
                Err(_) => report(&errors, &path, "watch trigger dropped".to_string()),
            },
        }
    }
    info!(path = %path, "Stop watching directory");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::memory::MemoryStore;
    use std::sync::Arc;

    const RETRY: Duration = Duration::from_millis(20);

    async fn setup() -> (MemoryStore, CoordinationClient, CoordinationClient) {
        let store = MemoryStore::new();
        let connect = || {
            CoordinationClient::new(
                vec!["memory".to_string()],
                Duration::from_secs(5),
                Arc::new(store.clone()),
            )
        };
        let watcher_client = connect();
        let writer = connect();
        writer.create_persistent_node("/svc").await.unwrap();
        (store, watcher_client, writer)
    }

    async fn next(watcher: &mut DirectoryWatcher) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), watcher.next_snapshot())
            .await
            .expect("no snapshot in time")
            .expect("watcher closed")
    }

    #[tokio::test]
    async fn test_snapshots_follow_changes() {
        let (_store, client, writer) = setup().await;
        let mut watcher = client.watch_dir("/svc", RETRY).await.unwrap();
        assert_eq!(watcher.path(), "/svc");
        assert!(next(&mut watcher).await.is_empty());

        writer.create_ephemeral_node("/svc/a:1").await.unwrap();
        assert_eq!(next(&mut watcher).await, vec!["a:1"]);

        writer.create_ephemeral_node("/svc/b:1").await.unwrap();
        assert_eq!(next(&mut watcher).await, vec!["a:1", "b:1"]);

        writer.delete_node("/svc/a:1").await.unwrap();
        assert_eq!(next(&mut watcher).await, vec!["b:1"]);

        watcher.close().await;
    }

    #[tokio::test]
    async fn test_errors_reported_and_retried() {
        let (store, client, writer) = setup().await;
        let mut watcher = client.watch_dir("/svc", RETRY).await.unwrap();
        assert!(next(&mut watcher).await.is_empty());

        store.set_available(false);
        let err = tokio::time::timeout(Duration::from_secs(5), watcher.next_error())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, Error::Watch { ref path, .. } if path == "/svc"));

        store.set_available(true);
        writer.create_ephemeral_node("/svc/a:1").await.unwrap();
        // The loop recovers after backoff; the latest snapshot wins
        let mut snapshot = next(&mut watcher).await;
        while snapshot.is_empty() {
            snapshot = next(&mut watcher).await;
        }
        assert_eq!(snapshot, vec!["a:1"]);
        watcher.close().await;
    }

    #[tokio::test]
    async fn test_missing_directory_retries() {
        let (_store, client, writer) = setup().await;
        let mut watcher = client.watch_dir("/later", RETRY).await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), watcher.next_error())
            .await
            .unwrap()
            .unwrap();
        assert!(err.to_string().contains("/later"));

        writer.create_persistent_node("/later").await.unwrap();
        assert!(next(&mut watcher).await.is_empty());
        watcher.close().await;
    }

    #[tokio::test]
    async fn test_close_ends_sequences() {
        let (_store, client, writer) = setup().await;
        let mut watcher = client.watch_dir("/svc", RETRY).await.unwrap();
        let mut children = watcher.take_children().unwrap();
        let mut errors = watcher.take_errors().unwrap();
        assert!(children.recv().await.unwrap().is_empty());

        // Unread snapshot blocks the loop; close must still return
        writer.create_ephemeral_node("/svc/a:1").await.unwrap();
        writer.create_ephemeral_node("/svc/b:1").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), watcher.close())
            .await
            .expect("close did not return");
        watcher.close().await;

        while children.recv().await.is_some() {}
        assert!(errors.recv().await.is_none());
        assert!(watcher.next_snapshot().await.is_none());
    }
}
