//! In-process bus runtime.
//!
//! Everything sent through a loopback context is queued for its own
//! receiver, mirroring a component whose routing table points back at
//! itself. Failure modes can be injected to exercise the HTTP fallback.
//! The queue is bounded; once it is full, sends are refused with
//! [`BusStatus::Retry`] until something receives.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::bus::{BusContext, BusRuntime, BusStatus, MessageBuffer, RECEIVE_QUEUE_DEPTH};
use crate::errors::{AlarmError, Result};

#[derive(Debug, Clone)]
pub struct LoopbackBus {
    init_delay: Option<Duration>,
    fail_init: bool,
    send_status: Option<BusStatus>,
    queue_depth: usize,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self {
            init_delay: None,
            fail_init: false,
            send_status: None,
            queue_depth: RECEIVE_QUEUE_DEPTH,
        }
    }
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unreceived messages kept before sends are refused
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Delay initialisation, emulating a runtime that waits for its routes
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    /// Initialisation always fails, the bus never becomes ready
    pub fn unavailable(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Every send is rejected with `status`
    pub fn failing_with(mut self, status: BusStatus) -> Self {
        self.send_status = Some(status);
        self
    }
}

#[async_trait]
impl BusRuntime for LoopbackBus {
    async fn init(&self) -> Result<Arc<dyn BusContext>> {
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_init {
            return Err(AlarmError::BusInit("loopback bus unavailable".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.queue_depth);
        Ok(Arc::new(LoopbackContext {
            tx,
            rx: Mutex::new(rx),
            send_status: self.send_status,
        }))
    }
}

struct LoopbackContext {
    tx: mpsc::Sender<MessageBuffer>,
    rx: Mutex<mpsc::Receiver<MessageBuffer>>,
    send_status: Option<BusStatus>,
}

#[async_trait]
impl BusContext for LoopbackContext {
    async fn send(&self, message: MessageBuffer) -> std::result::Result<(), BusStatus> {
        if let Some(status) = self.send_status {
            return Err(status);
        }
        debug!(len = message.len(), "Loopback send");
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => BusStatus::Retry,
            TrySendError::Closed(_) => BusStatus::SendFailed,
        })
    }

    async fn recv(&self) -> Option<MessageBuffer> {
        self.rx.lock().await.recv().await
    }
}
