#![forbid(unsafe_code)]

//! Child-process supervision, event fan-out, and path remapping for the
//! cowork daemon (C3-C6): spawns and tracks children, streams their stdout
//! and stderr as events, signals whole process groups, and bridges the
//! virtual/real filesystem namespaces the desktop client and the spawned
//! CLI tool each expect.

mod backend;
mod error;
mod events;
mod line_reader;
mod path_remap;
mod process;
mod signal;
mod table;

pub use backend::HostBackend;
#[cfg(feature = "vm-backend")]
pub use backend::VmBackend;
pub use backend::Backend;
pub use error::{BackendError, SupervisorError};
pub use events::{EventBus, EventSink, Subscription};
pub use path_remap::PathRemap;
pub use process::SpawnSpec;
pub use signal::{parse_signal, signal_name};
pub use table::ProcessTable;
