//! TCP line-delimited transport adapter.
//!
//! The helmet bridge exposes the sensor link as a TCP endpoint speaking
//! one text message per line. This adapter owns the connection lifecycle:
//! each line becomes one inbound frame, connect/teardown become link
//! events, and outbound writes are serialized through a channel so the
//! engine's [`TransportLink`] stays synchronous. The engine subscribes to
//! the transport; it never implements the transport's callbacks.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use visor_core::{EngineHandle, TransportLink, VisorError};

const OUTBOUND_QUEUE: usize = 32;
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// The outbound half handed to the engine.
pub struct BridgeTransport {
    outbound: mpsc::Sender<Vec<u8>>,
}

impl TransportLink for BridgeTransport {
    fn send(&self, payload: &[u8]) -> visor_core::Result<()> {
        self.outbound
            .try_send(payload.to_vec())
            .map_err(|err| VisorError::Transport(err.to_string()))
    }
}

/// Create the transport pair: the engine-facing sender and the receiver
/// consumed by [`run_bridge`].
#[must_use]
pub fn bridge_transport() -> (BridgeTransport, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    (BridgeTransport { outbound: tx }, rx)
}

/// Connect to the bridge and pump frames until the engine goes away.
/// Reconnects with capped exponential backoff.
pub async fn run_bridge(
    addr: String,
    handle: EngineHandle,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                backoff = Duration::from_secs(1);
                info!(%addr, "connected to helmet bridge");
                if handle.link_established().await.is_err() {
                    return;
                }
                let reason = pump(stream, &handle, &mut outbound).await;
                if handle.link_lost(reason).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(%addr, error = %err, "bridge connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
}

/// Pump one established connection. Returns the teardown reason reported
/// to the engine.
async fn pump(
    stream: TcpStream,
    handle: &EngineHandle,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) -> Option<String> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if handle.raw_frame(line.into_bytes()).await.is_err() {
                        return None;
                    }
                }
                Ok(None) => return Some("connection closed by peer".to_string()),
                Err(err) => return Some(err.to_string()),
            },
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(err) = write_line(&mut writer, &payload).await {
                        warn!(error = %err, "bridge write failed");
                        return Some(err.to_string());
                    }
                }
                None => return Some("outbound channel closed".to_string()),
            },
        }
    }
}

async fn write_line(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    payload: &[u8],
) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use visor_core::{Collaborators, Engine, OperatingMode, VisorConfig};

    use super::*;
    use crate::sinks::{
        JsonAlertStore, LogCueSink, LogEmergencyCallSink, LogEmergencyContactSink,
        LogNotificationSink, NoFixLocationSource, NoopExecutionExtension,
    };

    fn test_engine(dir: &std::path::Path) -> (Engine, EngineHandle, mpsc::Receiver<Vec<u8>>) {
        let (transport, outbound) = bridge_transport();
        let collaborators = Collaborators {
            alerts: Arc::new(JsonAlertStore::new(dir.to_path_buf())),
            notifications: Arc::new(LogNotificationSink),
            cue: Arc::new(LogCueSink),
            contact: Arc::new(LogEmergencyContactSink),
            caller: Arc::new(LogEmergencyCallSink),
            location: Arc::new(NoFixLocationSource),
            execution: Arc::new(NoopExecutionExtension::default()),
            transport: Arc::new(transport),
        };
        let (engine, handle) = Engine::new(VisorConfig::default(), collaborators);
        (engine, handle, outbound)
    }

    #[tokio::test]
    async fn test_bridge_reports_link_lifecycle_and_forwards_frames() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (engine, handle, outbound) = test_engine(dir.path());
        tokio::spawn(engine.run());
        let mut snapshots = handle.subscribe();
        tokio::spawn(run_bridge(addr, handle.clone(), outbound));

        let (mut peer, _) = listener.accept().await.unwrap();

        // Link comes up.
        timeout(Duration::from_secs(5), async {
            while !snapshots.borrow_and_update().link_up {
                snapshots.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        // An outbound mode write reaches the peer as one line.
        handle.set_mode(OperatingMode::Guard).await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"MODE:GUARD\n");

        // Teardown surfaces as link lost.
        drop(peer);
        timeout(Duration::from_secs(5), async {
            while snapshots.borrow_and_update().link_up {
                snapshots.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_transport_send_is_best_effort() {
        let (transport, rx) = bridge_transport();
        drop(rx);
        let err = transport.send(b"MODE:OFF").unwrap_err();
        assert!(err.is_transport_error());
    }
}
