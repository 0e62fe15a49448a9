//! UDP front end: socket binding, the receive loop, and the socket-backed
//! response sink.

use crate::dispatch::{InboundItem, ResponseSink};
use crate::packet::{MAX_FRAME_LEN, PAYLOAD_OFFSET};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bind the command socket. This is the only fatal startup error; everything
/// after it is handled in-loop.
pub async fn bind_command_socket(addr: &str) -> Result<Arc<UdpSocket>, ServerError> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "command socket bound");
    Ok(Arc::new(socket))
}

/// Receive datagrams, filter on the destination field, and forward candidate
/// frames to the dispatcher. Runt datagrams and frames addressed elsewhere
/// are dropped without a response.
pub fn spawn_receive_loop(
    socket: Arc<UdpSocket>,
    subsystem: String,
    tx: UnboundedSender<InboundItem>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_FRAME_LEN];
        loop {
            let (n, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    warn!(%err, "socket receive failed");
                    continue;
                }
            };
            if n < PAYLOAD_OFFSET {
                debug!(%peer, bytes = n, "dropping runt datagram");
                continue;
            }
            let destination = &buf[..3];
            if destination != subsystem.as_bytes() && destination != b"ALL".as_slice() {
                continue;
            }
            if tx.send(InboundItem::Frame(buf[..n].to_vec(), peer)).is_err() {
                break;
            }
        }
    })
}

pub struct UdpResponseSink {
    socket: Arc<UdpSocket>,
}

impl UdpResponseSink {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl ResponseSink for UdpResponseSink {
    async fn send(&mut self, peer: SocketAddr, frame: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(frame, peer).await.map(|_| ())
    }
}
