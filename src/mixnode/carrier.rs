//! Length-prefixed TCP carrier: ingress listener plus a relay directory for
//! resolving a [`RelayId`] to the address the pipeline should forward to.
//!
//! Wire framing (spec §6, bit-exact): a 4-byte big-endian length followed by
//! exactly `PACKET_SIZE` bytes. Any other length is dropped — the carrier
//! assumes confidentiality/authenticity are handled hop-to-hop below it and
//! defines nothing about TLS.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, warn};

use crate::sphinx::header::RelayId;
use crate::{FogError, FogResult, PACKET_SIZE};

const LENGTH_PREFIX_SIZE: usize = 4;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct CarrierConfig {
    pub listen_addr: SocketAddr,
    pub read_timeout: Duration,
    pub read_buffer_capacity: usize,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".parse().unwrap(),
            read_timeout: Duration::from_secs(30),
            read_buffer_capacity: 16 * 1024,
        }
    }
}

/// Maps the opaque [`RelayId`]s carried inside a Sphinx header to the
/// network address the carrier should actually dial (header.rs's own doc
/// comment explains why the header can't carry a `SocketAddr` directly).
#[derive(Debug, Default)]
pub struct RelayDirectory {
    entries: RwLock<HashMap<RelayId, SocketAddr>>,
}

impl RelayDirectory {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, id: RelayId, addr: SocketAddr) {
        self.entries.write().await.insert(id, addr);
    }

    pub async fn deregister(&self, id: &RelayId) {
        self.entries.write().await.remove(id);
    }

    pub async fn resolve(&self, id: &RelayId) -> Option<SocketAddr> {
        self.entries.read().await.get(id).copied()
    }
}

/// Accepts carrier connections and decodes length-prefixed frames into raw
/// packet bytes delivered on `ingress_tx`.
pub struct Carrier {
    config: CarrierConfig,
}

impl Carrier {
    pub fn new(config: CarrierConfig) -> Self {
        Self { config }
    }

    /// Run the accept loop until `shutdown` fires.
    pub async fn run(
        &self,
        ingress_tx: mpsc::Sender<(SocketAddr, Vec<u8>)>,
        shutdown: broadcast::Sender<()>,
    ) -> FogResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(FogError::Io)?;
        debug!(addr = %self.config.listen_addr, "carrier listening");

        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let tx = ingress_tx.clone();
                            let read_timeout = self.config.read_timeout;
                            let buffer_capacity = self.config.read_buffer_capacity;
                            let conn_shutdown = shutdown.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, tx, read_timeout, buffer_capacity, conn_shutdown).await {
                                    error!(%peer_addr, error = %e, "carrier connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "carrier failed to accept connection"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("carrier shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    ingress_tx: mpsc::Sender<(SocketAddr, Vec<u8>)>,
    read_timeout: Duration,
    buffer_capacity: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> FogResult<()> {
    let mut buffer = BytesMut::with_capacity(buffer_capacity);

    loop {
        tokio::select! {
            read = tokio::time::timeout(read_timeout, stream.read_buf(&mut buffer)) => {
                match read {
                    Ok(Ok(0)) => return Ok(()),
                    Ok(Ok(_)) => {
                        while let Some(frame) = try_take_frame(&mut buffer) {
                            // Bounded ingress applies backpressure by refusal, not by
                            // blocking the reader (spec §4.5: "when full, new
                            // connections are refused"); a full channel here just
                            // drops the frame rather than stalling this connection.
                            match ingress_tx.try_send((peer_addr, frame)) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    warn!(%peer_addr, "ingress queue full, dropping frame");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
                            }
                        }
                    }
                    Ok(Err(e)) => return Err(FogError::Io(e)),
                    Err(_) => {
                        warn!(%peer_addr, "carrier read timeout");
                        return Ok(());
                    }
                }
            }
            _ = shutdown.recv() => return Ok(()),
        }
    }
}

/// Pull one length-prefixed frame out of `buffer` if a complete one is
/// present. Frames whose declared length isn't exactly `PACKET_SIZE` are
/// dropped (spec §6) rather than causing the connection to desync: the
/// length prefix is still trusted to skip past the malformed payload.
fn try_take_frame(buffer: &mut BytesMut) -> Option<Vec<u8>> {
    loop {
        if buffer.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        let length = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if buffer.len() < LENGTH_PREFIX_SIZE + length {
            return None;
        }
        let frame = buffer.split_to(LENGTH_PREFIX_SIZE + length).split_off(LENGTH_PREFIX_SIZE);
        if length != PACKET_SIZE {
            warn!(length, "dropping carrier frame of unexpected length");
            continue;
        }
        return Some(frame.to_vec());
    }
}

/// Writes one length-prefixed frame to `addr`, dialing a fresh connection.
/// Batched callers should prefer writing several frames over one dial where
/// the pipeline's batching window groups packets bound for the same peer.
pub async fn send_frame(addr: SocketAddr, packet_bytes: &[u8]) -> FogResult<()> {
    let mut stream = TcpStream::connect(addr).await.map_err(FogError::Io)?;
    send_frame_on(&mut stream, packet_bytes).await
}

pub async fn send_frame_on(stream: &mut TcpStream, packet_bytes: &[u8]) -> FogResult<()> {
    let length = (packet_bytes.len() as u32).to_be_bytes();
    stream.write_all(&length).await.map_err(FogError::Io)?;
    stream.write_all(packet_bytes).await.map_err(FogError::Io)?;
    stream.flush().await.map_err(FogError::Io)
}

pub type SharedDirectory = Arc<RelayDirectory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_frame_is_extracted() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&(PACKET_SIZE as u32).to_be_bytes());
        buffer.extend_from_slice(&vec![7u8; PACKET_SIZE]);
        let frame = try_take_frame(&mut buffer).unwrap();
        assert_eq!(frame.len(), PACKET_SIZE);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&(PACKET_SIZE as u32).to_be_bytes());
        buffer.extend_from_slice(&vec![1u8; 10]);
        assert!(try_take_frame(&mut buffer).is_none());
    }

    #[test]
    fn wrong_length_frame_is_dropped_not_returned() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&50u32.to_be_bytes());
        buffer.extend_from_slice(&vec![2u8; 50]);
        assert!(try_take_frame(&mut buffer).is_none());
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn directory_round_trips_registration() {
        let dir = RelayDirectory::new();
        let id = RelayId::from_pubkey_bytes(&[9u8; 32]);
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        dir.register(id, addr).await;
        assert_eq!(dir.resolve(&id).await, Some(addr));
        dir.deregister(&id).await;
        assert_eq!(dir.resolve(&id).await, None);
    }
}
