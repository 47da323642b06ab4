use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;
use wire::{
    AddApprovedOauthTokenParams, ConfigureParams, ConnectedResult, DownloadStatus,
    DownloadStatusResult, KillParams, MountPathParams, NameParams, ProcessIdParams,
    ReadFileParams, ReadFileResult, RunningResult, SetDebugLoggingParams, SpawnParams,
    SpawnResult, SubscribeResult, WriteStdinParams,
};

use crate::error::BackendError;
use crate::events::{EventBus, EventSink, Subscription};
use crate::path_remap::PathRemap;
use crate::process::SpawnSpec;
use crate::table::ProcessTable;

/// The capability set the dispatcher (C7) drives, independent of how
/// processes and VM lifecycle are actually realized. One interface, two
/// implementations: `HostBackend` runs children directly on this host;
/// `VmBackend` (feature `vm-backend`) would proxy the same calls into a
/// VM-backed guest and is out of scope here.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn configure(&self, params: ConfigureParams) -> Result<(), BackendError>;
    async fn create_vm(&self, params: NameParams) -> Result<(), BackendError>;
    async fn start_vm(&self, params: NameParams) -> Result<(), BackendError>;
    async fn stop_vm(&self, params: NameParams) -> Result<(), BackendError>;
    async fn is_running(&self, params: NameParams) -> Result<RunningResult, BackendError>;
    async fn is_guest_connected(&self, params: NameParams) -> Result<ConnectedResult, BackendError>;
    async fn spawn(&self, params: SpawnParams) -> Result<SpawnResult, BackendError>;
    async fn kill(&self, params: KillParams) -> Result<(), BackendError>;
    async fn write_stdin(&self, params: WriteStdinParams) -> Result<(), BackendError>;
    async fn is_process_running(&self, params: ProcessIdParams) -> Result<RunningResult, BackendError>;
    async fn mount_path(&self, params: MountPathParams) -> Result<(), BackendError>;
    async fn read_file(&self, params: ReadFileParams) -> Result<ReadFileResult, BackendError>;
    async fn install_sdk(&self, params: NameParams) -> Result<(), BackendError>;
    async fn add_approved_oauth_token(&self, params: AddApprovedOauthTokenParams) -> Result<(), BackendError>;
    async fn set_debug_logging(&self, params: SetDebugLoggingParams) -> Result<(), BackendError>;
    async fn subscribe_events(&self, params: NameParams, sink: Arc<dyn EventSink>) -> Result<(Subscription, SubscribeResult), BackendError>;
    async fn get_download_status(&self) -> Result<DownloadStatusResult, BackendError>;

    /// Signals every tracked process; used by the server on shutdown.
    fn kill_all(&self, signal: nix::sys::signal::Signal);
}

/// Runs child processes directly on this host. VM lifecycle operations
/// (`createVM`/`startVM`/`stopVM`/`isGuestConnected`/`installSdk`/
/// `addApprovedOauthToken`) are no-ops or trivially-true/false here: there is
/// no guest to create, start, or connect to, so the contract degenerates to
/// "the host is always the VM" (documented in the grounding ledger).
pub struct HostBackend {
    table: ProcessTable,
    events: Arc<EventBus>,
    /// Host mount registrations made via `mountPath`, keyed by VM/session
    /// name, consulted at `spawn` time to seed that process's path remapper.
    registered_mounts: Mutex<BTreeMap<String, Vec<(String, String)>>>,
}

impl HostBackend {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            table: ProcessTable::new(Arc::clone(&events)),
            events,
            registered_mounts: Mutex::new(BTreeMap::new()),
        }
    }

    fn build_remap(&self, name: &str, additional_mounts: &BTreeMap<String, wire::AdditionalMount>) -> PathRemap {
        let vm_prefix = if name.is_empty() {
            String::new()
        } else {
            format!("/sessions/{name}")
        };
        let mut remap = PathRemap::new(vm_prefix.clone(), vm_prefix);

        if let Some(registered) = self.registered_mounts.lock().get(name) {
            for (from, to) in registered {
                remap.add_mount(from.clone(), to.clone());
            }
        }
        for (mount_name, mount) in additional_mounts {
            let from = format!("/sessions/{name}/mnt/{mount_name}");
            remap.add_mount(from, mount.path.clone());
        }
        remap
    }
}

#[async_trait]
impl Backend for HostBackend {
    async fn configure(&self, _params: ConfigureParams) -> Result<(), BackendError> {
        Ok(())
    }

    async fn create_vm(&self, params: NameParams) -> Result<(), BackendError> {
        require_name(&params)?;
        Ok(())
    }

    async fn start_vm(&self, params: NameParams) -> Result<(), BackendError> {
        require_name(&params)?;
        self.events
            .publish(wire::Event::VmStarted { name: params.name })
            .await;
        Ok(())
    }

    async fn stop_vm(&self, params: NameParams) -> Result<(), BackendError> {
        require_name(&params)?;
        self.events
            .publish(wire::Event::VmStopped { name: params.name })
            .await;
        Ok(())
    }

    async fn is_running(&self, params: NameParams) -> Result<RunningResult, BackendError> {
        if params.name.is_empty() {
            warn!("isRunning called without a name; treating as not running");
        }
        // The host is always "the VM"; there is no separate guest lifecycle
        // to report on here.
        Ok(RunningResult { running: true })
    }

    async fn is_guest_connected(&self, params: NameParams) -> Result<ConnectedResult, BackendError> {
        if params.name.is_empty() {
            warn!("isGuestConnected called without a name; treating as connected");
        }
        Ok(ConnectedResult { connected: true })
    }

    async fn spawn(&self, params: SpawnParams) -> Result<SpawnResult, BackendError> {
        let remap = self.build_remap(&params.name, &params.additional_mounts);
        let cwd = if params.cwd.is_empty() {
            None
        } else {
            Some(PathBuf::from(params.cwd))
        };
        let spec = SpawnSpec {
            id: (!params.id.is_empty()).then_some(params.id),
            command: params.command,
            args: params.args,
            env: params.env,
            cwd,
            remap,
        };
        let id = self.table.spawn(spec).await?;
        Ok(SpawnResult { id })
    }

    async fn kill(&self, params: KillParams) -> Result<(), BackendError> {
        self.table.kill(&params.id, &params.signal)?;
        Ok(())
    }

    async fn write_stdin(&self, params: WriteStdinParams) -> Result<(), BackendError> {
        self.table.write_stdin(&params.id, params.data.as_bytes()).await?;
        Ok(())
    }

    async fn is_process_running(&self, params: ProcessIdParams) -> Result<RunningResult, BackendError> {
        // Unknown id reports false, not an error (§4.3).
        let running = self.table.is_running(&params.id).unwrap_or(false);
        Ok(RunningResult { running })
    }

    async fn mount_path(&self, params: MountPathParams) -> Result<(), BackendError> {
        let mut mounts = self.registered_mounts.lock();
        mounts
            .entry(params.name)
            .or_default()
            .push((params.guest_path, params.host_path));
        Ok(())
    }

    async fn read_file(&self, params: ReadFileParams) -> Result<ReadFileResult, BackendError> {
        if params.name.is_empty() {
            warn!("readFile called without a name; reading directly from the host path");
        }
        let path = PathBuf::from(&params.path);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| BackendError::ReadFile {
                path: path.clone(),
                source,
            })?;
        let data = String::from_utf8(bytes).map_err(|_| BackendError::NotUtf8 { path })?;
        Ok(ReadFileResult { data })
    }

    async fn install_sdk(&self, params: NameParams) -> Result<(), BackendError> {
        require_name(&params)?;
        Ok(())
    }

    async fn add_approved_oauth_token(&self, params: AddApprovedOauthTokenParams) -> Result<(), BackendError> {
        if params.name.is_empty() {
            warn!("addApprovedOauthToken called without a name");
        }
        Ok(())
    }

    async fn set_debug_logging(&self, params: SetDebugLoggingParams) -> Result<(), BackendError> {
        if params.enabled {
            tracing::Span::current().in_scope(|| tracing::info!("debug logging requested by client"));
        }
        Ok(())
    }

    async fn subscribe_events(&self, _params: NameParams, sink: Arc<dyn EventSink>) -> Result<(Subscription, SubscribeResult), BackendError> {
        let subscription = self.events.subscribe(sink);
        Ok((subscription, SubscribeResult { subscribed: true }))
    }

    async fn get_download_status(&self) -> Result<DownloadStatusResult, BackendError> {
        // There is nothing to download for a host-native backend.
        Ok(DownloadStatusResult {
            status: DownloadStatus::Ready,
        })
    }

    fn kill_all(&self, signal: nix::sys::signal::Signal) {
        self.table.kill_all(signal);
    }
}

fn require_name(params: &NameParams) -> Result<(), BackendError> {
    if params.name.is_empty() {
        return Err(BackendError::EmptyVmName);
    }
    Ok(())
}

#[cfg(feature = "vm-backend")]
pub struct VmBackend;

#[cfg(feature = "vm-backend")]
#[async_trait]
impl Backend for VmBackend {
    async fn configure(&self, _params: ConfigureParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn create_vm(&self, _params: NameParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn start_vm(&self, _params: NameParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn stop_vm(&self, _params: NameParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn is_running(&self, _params: NameParams) -> Result<RunningResult, BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn is_guest_connected(&self, _params: NameParams) -> Result<ConnectedResult, BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn spawn(&self, _params: SpawnParams) -> Result<SpawnResult, BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn kill(&self, _params: KillParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn write_stdin(&self, _params: WriteStdinParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn is_process_running(&self, _params: ProcessIdParams) -> Result<RunningResult, BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn mount_path(&self, _params: MountPathParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn read_file(&self, _params: ReadFileParams) -> Result<ReadFileResult, BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn install_sdk(&self, _params: NameParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn add_approved_oauth_token(&self, _params: AddApprovedOauthTokenParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn set_debug_logging(&self, _params: SetDebugLoggingParams) -> Result<(), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn subscribe_events(&self, _params: NameParams, _sink: Arc<dyn EventSink>) -> Result<(Subscription, SubscribeResult), BackendError> {
        Err(BackendError::VmUnsupported)
    }
    async fn get_download_status(&self) -> Result<DownloadStatusResult, BackendError> {
        Err(BackendError::VmUnsupported)
    }
    fn kill_all(&self, _signal: nix::sys::signal::Signal) {}
}
