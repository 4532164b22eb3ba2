//! Message bus transport.
//!
//! The bus runtime itself is an external collaborator; this module only
//! defines the contract the alarm client consumes from it
//! ([`BusRuntime`], [`BusContext`]) and the adapter that ships alarm
//! payloads through it ([`BusSink`]).

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::errors::{AlarmError, Result};
use crate::types::RIC_ALARM_UPDATE;

/// Managed entity id attached to every alarm on the bus
pub const ALARM_MEID: &str = "ric";

/// Longest managed entity id the bus carries
pub const MAX_MEID_LEN: usize = 32;

/// Smallest payload buffer the adapter allocates
pub const MIN_PAYLOAD_CAPACITY: usize = 1024;

/// Inbound messages a runtime queues before senders see back pressure
pub(crate) const RECEIVE_QUEUE_DEPTH: usize = 1024;

/// State codes reported by the bus runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusStatus {
    Ok,
    BadArg,
    NoEndpoint,
    Empty,
    NoHeader,
    SendFailed,
    CallFailed,
    NoWormholeOpen,
    WormholeId,
    Overflow,
    Retry,
    ReceiveFailed,
    Timeout,
    Unset,
    Truncated,
    InitFailed,
}

impl BusStatus {
    /// Numeric code as reported by the runtime
    pub fn code(&self) -> i32 {
        match self {
            BusStatus::Ok => 0,
            BusStatus::BadArg => 1,
            BusStatus::NoEndpoint => 2,
            BusStatus::Empty => 3,
            BusStatus::NoHeader => 4,
            BusStatus::SendFailed => 5,
            BusStatus::CallFailed => 6,
            BusStatus::NoWormholeOpen => 7,
            BusStatus::WormholeId => 8,
            BusStatus::Overflow => 9,
            BusStatus::Retry => 10,
            BusStatus::ReceiveFailed => 11,
            BusStatus::Timeout => 12,
            BusStatus::Unset => 13,
            BusStatus::Truncated => 14,
            BusStatus::InitFailed => 15,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BusStatus::Ok => "OK",
            BusStatus::BadArg => "ERR_BADARG",
            BusStatus::NoEndpoint => "ERR_NOENDPT",
            BusStatus::Empty => "ERR_EMPTY",
            BusStatus::NoHeader => "ERR_NOHDR",
            BusStatus::SendFailed => "ERR_SENDFAILED",
            BusStatus::CallFailed => "ERR_CALLFAILED",
            BusStatus::NoWormholeOpen => "ERR_NOWHOPEN",
            BusStatus::WormholeId => "ERR_WHID",
            BusStatus::Overflow => "ERR_OVERFLOW",
            BusStatus::Retry => "ERR_RETRY",
            BusStatus::ReceiveFailed => "ERR_RCVFAILED",
            BusStatus::Timeout => "ERR_TIMEOUT",
            BusStatus::Unset => "ERR_UNSET",
            BusStatus::Truncated => "ERR_TRUNC",
            BusStatus::InitFailed => "ERR_INITFAILED",
        }
    }

    /// Whether a later attempt may succeed without changing the message
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusStatus::NoEndpoint | BusStatus::SendFailed | BusStatus::Retry | BusStatus::Timeout
        )
    }
}

impl Display for BusStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Owned message buffer handed to and received from the bus runtime
///
/// Dropping the buffer releases it, whichever way a send returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuffer {
    message_type: i32,
    meid: String,
    payload: BytesMut,
}

impl MessageBuffer {
    /// Allocate a buffer and copy `payload` into it
    ///
    /// Capacity is at least [`MIN_PAYLOAD_CAPACITY`].
    pub fn alloc(message_type: i32, meid: &str, payload: &[u8]) -> std::result::Result<Self, BusStatus> {
        if meid.len() > MAX_MEID_LEN {
            return Err(BusStatus::BadArg);
        }

        let mut buffer = BytesMut::with_capacity(payload.len().max(MIN_PAYLOAD_CAPACITY));
        buffer.put_slice(payload);

        Ok(Self {
            message_type,
            meid: meid.to_string(),
            payload: buffer,
        })
    }

    /// Rebuild a buffer received from the wire
    pub(crate) fn from_parts(message_type: i32, meid: String, payload: BytesMut) -> Self {
        Self {
            message_type,
            meid,
            payload,
        }
    }

    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    pub fn meid(&self) -> &str {
        &self.meid
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.payload.capacity()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload.freeze()
    }
}

/// Bus runtime initialisation
///
/// `init` is only called after the routing table location has been
/// published in the environment.
#[async_trait]
pub trait BusRuntime: Send + Sync {
    async fn init(&self) -> Result<Arc<dyn BusContext>>;
}

/// Handle to an initialised bus runtime
#[async_trait]
pub trait BusContext: Send + Sync {
    /// Send one message; `Err` carries the runtime's status
    async fn send(&self, message: MessageBuffer) -> std::result::Result<(), BusStatus>;

    /// Block until a message arrives; `None` once the bus is closed
    ///
    /// Concurrent receivers are not supported.
    async fn recv(&self) -> Option<MessageBuffer>;
}

/// Bus context slot filled once by bootstrap
pub(crate) struct BusState {
    endpoint: String,
    context: OnceLock<Arc<dyn BusContext>>,
    ready: watch::Sender<bool>,
}

impl BusState {
    pub(crate) fn new(endpoint: String) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            endpoint,
            context: OnceLock::new(),
            ready,
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Store the context and flag readiness; later calls are ignored
    pub(crate) fn install(&self, context: Arc<dyn BusContext>) -> bool {
        if self.context.set(context).is_err() {
            return false;
        }
        self.ready.send_replace(true);
        true
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.ready.borrow() && self.context.get().is_some()
    }

    pub(crate) fn context(&self) -> Option<&Arc<dyn BusContext>> {
        if self.is_ready() {
            self.context.get()
        } else {
            None
        }
    }

    pub(crate) async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives as long as self, so the channel never closes here
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Delivers alarm payloads over the bus
#[derive(Clone)]
pub struct BusSink {
    state: Arc<BusState>,
}

impl BusSink {
    pub(crate) fn new(state: Arc<BusState>) -> Self {
        Self { state }
    }

    pub fn endpoint(&self) -> &str {
        self.state.endpoint()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Send a serialized alarm message as a `RIC_ALARM_UPDATE`
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::BusNotReady`] before bootstrap has completed and
    /// [`AlarmError::BusSend`] when the runtime rejects the message.
    #[instrument(name = "BusSink::send", skip_all, fields(endpoint = %self.state.endpoint()))]
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let context = self.state.context().ok_or(AlarmError::BusNotReady)?;

        let send_error = |status| AlarmError::BusSend {
            endpoint: self.state.endpoint().to_string(),
            status,
        };

        let message = MessageBuffer::alloc(RIC_ALARM_UPDATE, ALARM_MEID, payload).map_err(send_error)?;
        debug!(len = message.len(), "Sending alarm over bus");

        context.send(message).await.map_err(send_error)?;

        info!("Alarm sent via bus");
        Ok(())
    }
}
