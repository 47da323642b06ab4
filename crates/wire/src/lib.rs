#![forbid(unsafe_code)]
//! Wire format for the cowork daemon: 4-byte length-prefixed JSON frames
//! carrying requests, responses, and server-pushed events.
//!
//! This crate has no knowledge of processes, sockets, or the backend trait —
//! it only defines the byte-level framing (`frame`) and the JSON shapes
//! (`message`) that ride inside it.

mod error;
mod frame;
mod message;

pub use error::DispatchError;
pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_BYTES};
pub use message::{
    AddApprovedOauthTokenParams, AdditionalMount, ConfigureParams, ConnectedResult,
    DownloadStatus, DownloadStatusResult, Event, KillParams, MountPathParams, NameParams,
    ProcessIdParams, Reachability, ReadFileParams, ReadFileResult, Request, Response,
    RunningResult, SetDebugLoggingParams, SpawnParams, SpawnResult, SubscribeResult,
    WriteStdinParams,
};
