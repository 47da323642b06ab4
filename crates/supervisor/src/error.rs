use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process {id} not found")]
    UnknownProcess { id: String },
    #[error("process {id} has exited")]
    AlreadyExited { id: String },
    #[error("process {id} exited during write")]
    ExitedDuringWrite { id: String },
    #[error("stdin write timeout for process {id}")]
    StdinTimeout { id: String },
    #[error("failed to resolve executable `{command}`")]
    ExecutableNotFound { command: String },
    #[error("failed to spawn process (binary={binary:?}): {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to signal process {id}: {source}")]
    Signal {
        id: String,
        #[source]
        source: nix::Error,
    },
    #[error("id {id} must be unique but is already in use")]
    DuplicateId { id: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("VM name must not be empty")]
    EmptyVmName,
    #[error("VM `{name}` not found")]
    VmNotFound { name: String },
    #[error("guest is not connected for VM `{name}`")]
    GuestNotConnected { name: String },
    #[error("failed to read `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file `{path}` is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
    #[error("the VM-backed implementation is not supported by this daemon")]
    VmUnsupported,
}
