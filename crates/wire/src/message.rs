use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request as received on the wire: `{method, params?, id?}`.
///
/// `id` is opaque and only ever echoed back by callers that choose to
/// correlate out-of-band; the response envelope itself carries no `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// A reply as sent on the wire. Exactly one of `result`/`error` is present,
/// selected by `success`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success { success: bool, result: Value },
    Failure { success: bool, error: String },
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Response::Success {
            success: true,
            result,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Response::Failure {
            success: false,
            error: message.into(),
        }
    }
}

/// Server-pushed events, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "stdout")]
    Stdout { id: String, data: String },
    #[serde(rename = "exit")]
    Exit {
        id: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
        #[serde(rename = "oomKillCount", skip_serializing_if = "Option::is_none")]
        oom_kill_count: Option<u32>,
    },
    #[serde(rename = "error")]
    ProcessError {
        id: String,
        message: String,
        fatal: bool,
    },
    #[serde(rename = "apiReachability")]
    ApiReachability {
        reachability: Reachability,
        #[serde(rename = "willTryRecover")]
        will_try_recover: bool,
    },
    #[serde(rename = "vmStarted")]
    VmStarted { name: String },
    #[serde(rename = "vmStopped")]
    VmStopped { name: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Unknown,
    Reachable,
    ProbablyUnreachable,
    Unreachable,
}

// ---------------------------------------------------------------------------
// Per-operation parameter and result shapes (§4.2).
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigureParams {
    pub memory: i64,
    pub cpus: i64,
}

/// `{name}` — accepted loosely: a missing/unparseable `name` is tolerated by
/// the operations that only read it (`isRunning`, `isGuestConnected`), per
/// the source's observed behavior (spec.md §9 open question); callers that
/// require a name to act on (`createVM`, `startVM`, `stopVM`, `mountPath`)
/// still decode via this same shape but the backend may reject an empty name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameParams {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningResult {
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedResult {
    pub connected: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdditionalMount {
    pub path: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpawnParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, rename = "additionalMounts")]
    pub additional_mounts: BTreeMap<String, AdditionalMount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpawnResult {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KillParams {
    pub id: String,
    #[serde(default)]
    pub signal: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteStdinParams {
    pub id: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessIdParams {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MountPathParams {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "hostPath")]
    pub host_path: String,
    #[serde(rename = "guestPath")]
    pub guest_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileParams {
    #[serde(default)]
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFileResult {
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddApprovedOauthTokenParams {
    #[serde(default)]
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetDebugLoggingParams {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeResult {
    pub subscribed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum DownloadStatus {
    Ready,
    NotDownloaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatusResult {
    pub status: DownloadStatus,
}
