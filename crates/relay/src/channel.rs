//! Single-worker execution channel in front of a relay backend.
//!
//! All backend traffic for a process flows through one `RelayChannel`. A
//! dedicated worker task owns the backend instance and services requests
//! strictly in submission order, which keeps backends that dislike
//! concurrent use of one connection (such as a bot session) safe without
//! locking in the request handlers.

use crate::error::{RelayError, RelayResult};
use crate::traits::{BlobRelay, RelayHandle};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Commands pending in submission order.
enum Command {
    Send {
        payload: Bytes,
        annotation: String,
        reply: oneshot::Sender<RelayResult<RelayHandle>>,
    },
    Fetch {
        handle: RelayHandle,
        reply: oneshot::Sender<RelayResult<Bytes>>,
    },
    Delete {
        handle: RelayHandle,
        reply: oneshot::Sender<RelayResult<()>>,
    },
    Health {
        reply: oneshot::Sender<RelayResult<()>>,
    },
}

/// Handle to the per-process relay worker.
///
/// Cheap to clone via `Arc` at the application level; request handlers
/// submit operations and await their replies.
pub struct RelayChannel {
    tx: mpsc::Sender<Command>,
    max_object_size: u64,
    backend_name: &'static str,
}

impl RelayChannel {
    /// Spawn the worker task around a backend instance.
    ///
    /// The backend is connected lazily on the first operation, so spawning
    /// never fails and a temporarily unreachable backend only surfaces when
    /// actually used.
    pub fn spawn(relay: Box<dyn BlobRelay>) -> Self {
        let max_object_size = relay.max_object_size();
        let backend_name = relay.backend_name();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(worker_loop(relay, rx));
        Self {
            tx,
            max_object_size,
            backend_name,
        }
    }

    /// The backend's per-object size ceiling.
    pub fn max_object_size(&self) -> u64 {
        self.max_object_size
    }

    /// The backend's identifier, for logging.
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Store a payload; resolves once the backend has accepted it.
    pub async fn send(&self, payload: Bytes, annotation: String) -> RelayResult<RelayHandle> {
        if payload.len() as u64 > self.max_object_size {
            return Err(RelayError::SizeCeiling {
                size: payload.len() as u64,
                ceiling: self.max_object_size,
            });
        }
        self.submit(|reply| Command::Send {
            payload,
            annotation,
            reply,
        })
        .await
    }

    /// Fetch a stored payload.
    pub async fn fetch(&self, handle: RelayHandle) -> RelayResult<Bytes> {
        self.submit(|reply| Command::Fetch { handle, reply }).await
    }

    /// Delete a stored payload.
    pub async fn delete(&self, handle: RelayHandle) -> RelayResult<()> {
        self.submit(|reply| Command::Delete { handle, reply }).await
    }

    /// Verify the backend connection, connecting if necessary.
    pub async fn health_check(&self) -> RelayResult<()> {
        self.submit(|reply| Command::Health { reply }).await
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<RelayResult<T>>) -> Command,
    ) -> RelayResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RelayError::ChannelClosed)?
    }
}

async fn worker_loop(mut relay: Box<dyn BlobRelay>, mut rx: mpsc::Receiver<Command>) {
    let mut connected = false;
    let backend = relay.backend_name();

    while let Some(command) = rx.recv().await {
        // Lazy connect; a failure answers this command and leaves the
        // worker alive for a later retry.
        if !connected {
            match relay.connect().await {
                Ok(()) => {
                    tracing::info!(backend, "relay backend connected");
                    connected = true;
                }
                Err(e) => {
                    tracing::warn!(backend, error = %e, "relay backend connect failed");
                    let unavailable = RelayError::Unavailable(e.to_string());
                    match command {
                        Command::Send { reply, .. } => {
                            let _ = reply.send(Err(unavailable));
                        }
                        Command::Fetch { reply, .. } => {
                            let _ = reply.send(Err(unavailable));
                        }
                        Command::Delete { reply, .. } => {
                            let _ = reply.send(Err(unavailable));
                        }
                        Command::Health { reply } => {
                            let _ = reply.send(Err(unavailable));
                        }
                    }
                    continue;
                }
            }
        }

        match command {
            Command::Send {
                payload,
                annotation,
                reply,
            } => {
                let result = relay.send(payload, &annotation).await;
                if let Err(e) = &result {
                    tracing::warn!(backend, error = %e, "relay send failed");
                }
                let _ = reply.send(result);
            }
            Command::Fetch { handle, reply } => {
                let result = relay.fetch(&handle).await;
                if let Err(e) = &result {
                    tracing::warn!(backend, handle = %handle, error = %e, "relay fetch failed");
                }
                let _ = reply.send(result);
            }
            Command::Delete { handle, reply } => {
                let result = relay.delete(&handle).await;
                if let Err(e) = &result {
                    tracing::warn!(backend, handle = %handle, error = %e, "relay delete failed");
                }
                let _ = reply.send(result);
            }
            Command::Health { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    tracing::debug!(backend, "relay worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory relay that records operation order.
    struct FakeRelay {
        objects: std::collections::HashMap<String, Bytes>,
        next_id: u64,
        connects: Arc<AtomicUsize>,
        fail_connects: usize,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl FakeRelay {
        fn new() -> Self {
            Self {
                objects: Default::default(),
                next_id: 0,
                connects: Default::default(),
                fail_connects: 0,
                log: Default::default(),
            }
        }
    }

    #[async_trait]
    impl BlobRelay for FakeRelay {
        async fn connect(&mut self) -> RelayResult<()> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_connects {
                return Err(RelayError::Unavailable("connect refused".to_string()));
            }
            Ok(())
        }

        async fn send(&mut self, payload: Bytes, annotation: &str) -> RelayResult<RelayHandle> {
            let handle = format!("obj-{}", self.next_id);
            self.next_id += 1;
            self.objects.insert(handle.clone(), payload);
            self.log.lock().unwrap().push(annotation.to_string());
            Ok(RelayHandle::new(handle))
        }

        async fn fetch(&mut self, handle: &RelayHandle) -> RelayResult<Bytes> {
            self.objects
                .get(handle.as_str())
                .cloned()
                .ok_or_else(|| RelayError::NotFound(handle.to_string()))
        }

        async fn delete(&mut self, handle: &RelayHandle) -> RelayResult<()> {
            self.objects.remove(handle.as_str());
            Ok(())
        }

        fn max_object_size(&self) -> u64 {
            1024
        }

        fn backend_name(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_send_fetch_delete_roundtrip() {
        let channel = RelayChannel::spawn(Box::new(FakeRelay::new()));

        let handle = channel
            .send(Bytes::from_static(b"payload"), "seg 0".to_string())
            .await
            .unwrap();
        let fetched = channel.fetch(handle.clone()).await.unwrap();
        assert_eq!(fetched.as_ref(), b"payload");

        channel.delete(handle.clone()).await.unwrap();
        let err = channel.fetch(handle).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_operations_serviced_in_submission_order() {
        let relay = FakeRelay::new();
        let log = relay.log.clone();
        let channel = Arc::new(RelayChannel::spawn(Box::new(relay)));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let channel = channel.clone();
            tasks.push(tokio::spawn(async move {
                channel
                    .send(Bytes::from_static(b"x"), format!("op {i}"))
                    .await
                    .unwrap();
            }));
            // Force submission order to match spawn order.
            tokio::task::yield_now().await;
        }
        for task in tasks {
            task.await.unwrap();
        }

        let seen = log.lock().unwrap().clone();
        let expected: Vec<String> = (0..8).map(|i| format!("op {i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_ceiling_enforced_before_submission() {
        let channel = RelayChannel::spawn(Box::new(FakeRelay::new()));
        let err = channel
            .send(Bytes::from(vec![0u8; 2048]), "big".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::SizeCeiling {
                size: 2048,
                ceiling: 1024
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_and_retries() {
        let mut relay = FakeRelay::new();
        relay.fail_connects = 1;
        let connects = relay.connects.clone();
        let channel = RelayChannel::spawn(Box::new(relay));

        // First operation hits the failed connect.
        let err = channel
            .send(Bytes::from_static(b"x"), "first".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Unavailable(_)));

        // Worker stays alive and reconnects on the next operation.
        channel
            .send(Bytes::from_static(b"x"), "second".to_string())
            .await
            .unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_health_check_connects_lazily() {
        let relay = FakeRelay::new();
        let connects = relay.connects.clone();
        let channel = RelayChannel::spawn(Box::new(relay));

        assert_eq!(connects.load(Ordering::SeqCst), 0);
        channel.health_check().await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}
