//! Plain-text status port for the in-process ensemble
//!
//! Answers the four-letter commands `stat` and `ruok` the way a coordination
//! server does: read the command, write a text report, close the connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memory::{MemoryEnsemble, ENSEMBLE_VERSION};

const COMMAND_LEN: usize = 4;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Reply of a server that is up but not serving requests
pub const NOT_SERVING: &str = "This ZooKeeper instance is not currently serving requests";

/// Status listener bound to a local address
pub struct StatusServer {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl StatusServer {
    /// Bind `addr` and start answering commands for `ensemble`
    pub async fn bind(ensemble: MemoryEnsemble, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        info!(%local_addr, "Status port listening");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let ensemble = ensemble.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve(stream, &ensemble).await {
                                    debug!(%peer, error = %e, "Status request failed");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Status accept failed"),
                    },
                    _ = shutdown_rx.recv() => {
                        info!(%local_addr, "Status port shutting down");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

async fn serve(mut stream: TcpStream, ensemble: &MemoryEnsemble) -> std::io::Result<()> {
    let mut command = [0u8; COMMAND_LEN];
    tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut command))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no command received"))??;

    let command = String::from_utf8_lossy(&command).into_owned();
    let reply = respond(&command, ensemble);
    stream.write_all(reply.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Text reply for one four-letter command
pub fn respond(command: &str, ensemble: &MemoryEnsemble) -> String {
    match command {
        "ruok" => "imok".to_string(),
        "stat" if !ensemble.is_available() => format!("{NOT_SERVING}\n"),
        "stat" => {
            let stats = ensemble.stats();
            format!(
                "Zookeeper version: {ENSEMBLE_VERSION}, built in-process\n\
                 Clients:\n\n\
                 Latency min/avg/max: 0/0/0\n\
                 Received: {requests}\n\
                 Sent: {requests}\n\
                 Connections: {sessions}\n\
                 Outstanding: 0\n\
                 Zxid: 0x{zxid:x}\n\
                 Mode: standalone\n\
                 Node count: {nodes}\n",
                requests = stats.requests,
                sessions = stats.sessions,
                zxid = stats.zxid,
                nodes = stats.nodes,
            )
        }
        other => format!("{other} is not executed because it is not in the whitelist.\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_report_leads_with_version() {
        let ensemble = MemoryEnsemble::new();
        let reply = respond("stat", &ensemble);
        let first = reply.lines().next().unwrap();
        assert!(first.starts_with("Zookeeper version: "));
        assert!(reply.contains("Mode: standalone"));
    }

    #[test]
    fn test_unavailable_ensemble_is_not_serving() {
        let ensemble = MemoryEnsemble::new();
        ensemble.set_available(false);
        assert_eq!(respond("stat", &ensemble).trim_end(), NOT_SERVING);
        assert_eq!(respond("ruok", &ensemble), "imok");
    }

    #[test]
    fn test_unknown_command() {
        let ensemble = MemoryEnsemble::new();
        assert!(respond("wchp", &ensemble).starts_with("wchp is not executed"));
    }
}
