//! In-process endpoints joining exactly one host and one worker.
//!
//! Each direction is a bounded mpsc queue, so the channel is ordered,
//! lossless, and applies backpressure when the receiving side falls behind.
//! Envelopes travel as structured values; nothing is serialized.

use std::time::Duration;

use offload_core::{Request, Response};
use tokio::sync::mpsc;

use super::config::ChannelConfig;

/// Error returned when an envelope cannot be handed to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The peer's queue stayed full for the whole send timeout.
    #[error("send timed out")]
    Timeout,
    /// The peer endpoint has been dropped.
    #[error("peer disconnected")]
    Disconnected,
    /// The peer's queue is full (non-blocking `try_send` only).
    #[error("channel full")]
    Full,
}

/// Sending half of one direction of the channel.
#[derive(Debug)]
pub struct ChannelSender<T> {
    tx: mpsc::Sender<T>,
    send_timeout: Duration,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            send_timeout: self.send_timeout,
        }
    }
}

impl<T> ChannelSender<T> {
    /// Attempts to enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Full` when the queue is at capacity and
    /// `SendError::Disconnected` when the peer is gone.
    pub fn try_send(&self, msg: T) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Enqueues, waiting at most the configured send timeout for capacity.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Timeout` if the queue stays full, or
    /// `SendError::Disconnected` if the peer endpoint was dropped.
    pub async fn send(&self, msg: T) -> Result<(), SendError> {
        match tokio::time::timeout(self.send_timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Returns `false` once the receiving endpoint has been dropped.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Host side: sends requests, receives responses.
#[derive(Debug)]
pub struct HostEndpoint {
    pub requests: ChannelSender<Request>,
    pub responses: mpsc::Receiver<Response>,
}

/// Worker side: receives requests, sends responses.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub requests: mpsc::Receiver<Request>,
    pub responses: ChannelSender<Response>,
}

/// Creates a connected host/worker endpoint pair.
#[must_use]
pub fn pair(config: &ChannelConfig) -> (HostEndpoint, WorkerEndpoint) {
    let (req_tx, req_rx) = mpsc::channel(config.capacity);
    let (resp_tx, resp_rx) = mpsc::channel(config.capacity);

    let host = HostEndpoint {
        requests: ChannelSender {
            tx: req_tx,
            send_timeout: config.send_timeout,
        },
        responses: resp_rx,
    };
    let worker = WorkerEndpoint {
        requests: req_rx,
        responses: ChannelSender {
            tx: resp_tx,
            send_timeout: config.send_timeout,
        },
    };
    (host, worker)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn small_config(capacity: usize) -> ChannelConfig {
        ChannelConfig {
            capacity,
            send_timeout: Duration::from_millis(20),
        }
    }

    fn req(id: &str) -> Request {
        Request::new(id, "m", "op", Value::Null)
    }

    #[tokio::test]
    async fn requests_arrive_in_order() {
        let (host, mut worker) = pair(&ChannelConfig::default());
        for i in 0..5 {
            host.requests.send(req(&format!("op-{i}"))).await.unwrap();
        }
        for i in 0..5 {
            let got = worker.requests.recv().await.unwrap();
            assert_eq!(got.id, format!("op-{i}"));
        }
    }

    #[tokio::test]
    async fn responses_flow_back_to_host() {
        let (mut host, worker) = pair(&ChannelConfig::default());
        worker
            .responses
            .send(Response::success("op-1", Value::from(3)))
            .await
            .unwrap();
        let got = host.responses.recv().await.unwrap();
        assert_eq!(got.id, "op-1");
        assert_eq!(got.data, Value::from(3));
    }

    #[test]
    fn try_send_reports_full() {
        let (host, _worker) = pair(&small_config(2));
        assert!(host.requests.try_send(req("a")).is_ok());
        assert!(host.requests.try_send(req("b")).is_ok());
        assert_eq!(host.requests.try_send(req("c")), Err(SendError::Full));
    }

    #[test]
    fn try_send_reports_disconnected() {
        let (host, worker) = pair(&small_config(2));
        drop(worker);
        assert_eq!(host.requests.try_send(req("a")), Err(SendError::Disconnected));
        assert!(!host.requests.is_connected());
    }

    #[tokio::test]
    async fn send_times_out_when_queue_stays_full() {
        let (host, _worker) = pair(&small_config(1));
        host.requests.send(req("a")).await.unwrap();
        let err = host.requests.send(req("b")).await.unwrap_err();
        assert_eq!(err, SendError::Timeout);
    }

    #[tokio::test]
    async fn send_reports_disconnected() {
        let (mut host, worker) = pair(&small_config(1));
        drop(worker);
        let err = host.requests.send(req("a")).await.unwrap_err();
        assert_eq!(err, SendError::Disconnected);
        assert!(host.responses.recv().await.is_none());
    }
}
