//! Bus runtime over TCP.
//!
//! Messages are length-delimited frames. Each frame carries a fixed
//! header followed by the payload:
//!
//! ```text
//! +----------------+-----------+------------------+-----------+
//! | mtype (i32 BE) | meid len  | meid (<= 32 B)   | payload   |
//! +----------------+-----------+------------------+-----------+
//! ```
//!
//! Outbound messages are routed by message type through the static
//! routing table; inbound frames accepted on the listen address are queued
//! for [`BusContext::recv`].
//!
//! The receiver answers every queued frame with an empty frame. A send
//! only succeeds once that acknowledgement arrives, so a peer that went
//! away is noticed on the send that hits it rather than silently eating
//! the frame. Both ends of a link must be a [`TcpBus`].

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::bus::{
    BusContext, BusRuntime, BusStatus, MessageBuffer, MAX_MEID_LEN, RECEIVE_QUEUE_DEPTH,
};
use crate::errors::{AlarmError, Result};
use crate::routing::RouteTable;

/// Default listen port of an alarm client on the bus
pub const DEFAULT_LISTEN_PORT: u16 = 4588;

/// How long a sender waits for the receiver to acknowledge a frame
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

const HEADER_LEN: usize = 4 + 1;

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

#[derive(Debug, Clone)]
pub struct TcpBus {
    listen_addr: String,
    routes: Option<RouteTable>,
}

impl TcpBus {
    /// Listen on all interfaces at `port`, routes come from the environment
    pub fn new(port: u16) -> Self {
        Self::with_listen_addr(format!("0.0.0.0:{port}"))
    }

    pub fn with_listen_addr(addr: impl Into<String>) -> Self {
        Self {
            listen_addr: addr.into(),
            routes: None,
        }
    }

    /// Use an explicit routing table instead of the published seed file
    pub fn with_route_table(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }
}

impl Default for TcpBus {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_PORT)
    }
}

#[async_trait]
impl BusRuntime for TcpBus {
    async fn init(&self) -> Result<Arc<dyn BusContext>> {
        let routes = match &self.routes {
            Some(routes) => routes.clone(),
            None => RouteTable::load_from_env().await?,
        };
        if routes.is_empty() {
            return Err(AlarmError::BusInit("routing table has no routes".to_string()));
        }

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| AlarmError::BusInit(format!("bind {} failed: {e}", self.listen_addr)))?;
        info!(addr = %self.listen_addr, routes = routes.entries().len(), "Bus listening");

        let (tx, rx) = mpsc::channel(RECEIVE_QUEUE_DEPTH);
        let acceptor = tokio::spawn(accept_loop(listener, tx));

        Ok(Arc::new(TcpContext {
            routes,
            connections: Mutex::new(HashMap::new()),
            inbound: Mutex::new(rx),
            acceptor,
        }))
    }
}

struct TcpContext {
    routes: RouteTable,
    connections: Mutex<HashMap<String, Connection>>,
    inbound: Mutex<mpsc::Receiver<MessageBuffer>>,
    acceptor: JoinHandle<()>,
}

impl Drop for TcpContext {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

#[async_trait]
impl BusContext for TcpContext {
    async fn send(&self, message: MessageBuffer) -> std::result::Result<(), BusStatus> {
        let endpoint = self
            .routes
            .endpoint_for(message.message_type())
            .ok_or(BusStatus::NoEndpoint)?;
        let frame = encode_frame(&message)?.freeze();

        let mut connections = self.connections.lock().await;

        // A cached connection whose peer has gone fails here; reconnect once
        if let Some(mut conn) = connections.remove(endpoint) {
            match deliver(&mut conn, frame.clone()).await {
                Ok(()) => {
                    connections.insert(endpoint.to_string(), conn);
                    return Ok(());
                }
                Err(BusStatus::Timeout) => {
                    warn!(endpoint, "Bus peer did not acknowledge");
                    return Err(BusStatus::Timeout);
                }
                Err(_) => debug!(endpoint, "Cached bus connection closed, reconnecting"),
            }
        }

        let stream = TcpStream::connect(endpoint).await.map_err(|e| {
            warn!(endpoint, error = %e, "Bus connect failed");
            BusStatus::SendFailed
        })?;
        let mut conn = Framed::new(stream, LengthDelimitedCodec::new());
        deliver(&mut conn, frame).await.map_err(|status| {
            warn!(endpoint, %status, "Bus frame send failed");
            status
        })?;

        connections.insert(endpoint.to_string(), conn);
        Ok(())
    }

    async fn recv(&self) -> Option<MessageBuffer> {
        self.inbound.lock().await.recv().await
    }
}

/// Write one frame and wait for the peer to acknowledge it
async fn deliver(conn: &mut Connection, frame: Bytes) -> std::result::Result<(), BusStatus> {
    conn.send(frame).await.map_err(|_| BusStatus::SendFailed)?;
    match tokio::time::timeout(ACK_TIMEOUT, conn.next()).await {
        Ok(Some(Ok(_))) => Ok(()),
        Ok(Some(Err(_))) | Ok(None) => Err(BusStatus::SendFailed),
        Err(_) => Err(BusStatus::Timeout),
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<MessageBuffer>) {
    // Peer tasks live in the set so aborting the loop closes them too
    let mut peers = JoinSet::new();
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Bus accept failed");
                    continue;
                }
            },
            Some(_) = peers.join_next(), if !peers.is_empty() => continue,
        };
        debug!(%peer, "Bus peer connected");

        let tx = tx.clone();
        peers.spawn(async move {
            let mut conn = Framed::new(stream, LengthDelimitedCodec::new());
            while let Some(frame) = conn.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(%peer, error = %e, "Bus read failed");
                        break;
                    }
                };
                let message = match decode_frame(frame) {
                    Ok(message) => message,
                    Err(status) => {
                        warn!(%peer, %status, "Dropping peer after malformed bus frame");
                        break;
                    }
                };
                if tx.send(message).await.is_err() {
                    break;
                }
                if conn.send(Bytes::new()).await.is_err() {
                    break;
                }
            }
            debug!(%peer, "Bus peer disconnected");
        });
    }
}

fn encode_frame(message: &MessageBuffer) -> std::result::Result<BytesMut, BusStatus> {
    let meid = message.meid().as_bytes();
    let meid_len = u8::try_from(meid.len())
        .ok()
        .filter(|len| usize::from(*len) <= MAX_MEID_LEN)
        .ok_or(BusStatus::BadArg)?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + meid.len() + message.len());
    frame.put_i32(message.message_type());
    frame.put_u8(meid_len);
    frame.put_slice(meid);
    frame.put_slice(message.payload());
    Ok(frame)
}

fn decode_frame(mut frame: BytesMut) -> std::result::Result<MessageBuffer, BusStatus> {
    if frame.len() < HEADER_LEN {
        return Err(BusStatus::NoHeader);
    }
    let message_type = frame.get_i32();
    let meid_len = usize::from(frame.get_u8());
    if meid_len > MAX_MEID_LEN || frame.len() < meid_len {
        return Err(BusStatus::NoHeader);
    }

    let meid = frame.split_to(meid_len);
    let meid = String::from_utf8(meid.to_vec()).map_err(|_| BusStatus::NoHeader)?;
    Ok(MessageBuffer::from_parts(message_type, meid, frame))
}
