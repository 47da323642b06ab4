use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use supervisor::{Backend, EventSink, Subscription};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};
use wire::{Event, FrameError};

use crate::dispatcher;

/// Owner-only socket permissions (§4.6).
const SOCKET_MODE: u32 = 0o700;

/// Binds the listener at `path`, serving connections until `shutdown` fires.
/// Removes a stale socket file first; unlinks the socket on the way out.
pub async fn serve(
    path: PathBuf,
    backend: Arc<dyn Backend>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    remove_stale_socket(&path)?;
    let listener = UnixListener::bind(&path)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!(socket = %path.display(), "listening");

    let mut workers = Vec::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let backend = Arc::clone(&backend);
                        let conn_shutdown = shutdown.clone();
                        workers.push(tokio::spawn(async move {
                            run_connection(stream, backend, conn_shutdown).await;
                        }));
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("shutting down: draining connection workers");
    for worker in workers {
        let _ = worker.await;
    }

    backend.kill_all(Signal::SIGTERM);
    let _ = std::fs::remove_file(&path);
    info!("shutdown complete");
    Ok(())
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Per-connection frame writer, shared between reply writes and pushed
/// events so neither ever interleaves with the other on the wire (§5).
struct ConnectionSink {
    write: AsyncMutex<tokio::net::unix::OwnedWriteHalf>,
}

impl ConnectionSink {
    async fn write_frame(&self, payload: &[u8]) -> Result<(), FrameError> {
        let mut guard = self.write.lock().await;
        wire::write_frame(&mut *guard, payload).await
    }
}

#[async_trait]
impl EventSink for ConnectionSink {
    async fn emit(&self, event: &Event) -> bool {
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "failed to serialize event");
                return false;
            }
        };
        self.write_frame(&payload).await.is_ok()
    }
}

async fn run_connection(stream: UnixStream, backend: Arc<dyn Backend>, mut shutdown: watch::Receiver<bool>) {
    let (mut read_half, write_half) = stream.into_split();
    let sink = Arc::new(ConnectionSink {
        write: AsyncMutex::new(write_half),
    });
    let mut subscriptions: Vec<Subscription> = Vec::new();

    loop {
        tokio::select! {
            frame = wire::read_frame(&mut read_half) => {
                let raw = match frame {
                    Ok(raw) => raw,
                    Err(err) => {
                        debug!(error = %err, "connection read ended");
                        break;
                    }
                };

                let (response, subscription) =
                    dispatcher::dispatch(&raw, backend.as_ref(), Arc::clone(&sink) as Arc<dyn EventSink>).await;
                if let Some(subscription) = subscription {
                    subscriptions.push(subscription);
                }

                let payload = match serde_json::to_vec(&response) {
                    Ok(p) => p,
                    Err(err) => {
                        error!(error = %err, "failed to serialize response");
                        break;
                    }
                };
                if sink.write_frame(&payload).await.is_err() {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    for subscription in subscriptions {
        subscription.cancel();
    }
}
