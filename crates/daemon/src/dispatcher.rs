use std::sync::Arc;

use serde::Serialize;
use supervisor::{Backend, EventSink, Subscription};
use tracing::{debug, warn};
use wire::{
    AddApprovedOauthTokenParams, ConfigureParams, DispatchError, KillParams, MountPathParams,
    NameParams, ProcessIdParams, ReadFileParams, Request, Response, SetDebugLoggingParams,
    SpawnParams, WriteStdinParams,
};

/// Decodes one request frame and dispatches it to `backend` (C7).
///
/// Returns the reply to send back on this connection, plus a freshly
/// registered `Subscription` when the request was `subscribeEvents` — the
/// caller (the connection loop) owns that subscription's lifetime and must
/// cancel it when the connection ends.
pub async fn dispatch(
    raw: &[u8],
    backend: &dyn Backend,
    sink: Arc<dyn EventSink>,
) -> (Response, Option<Subscription>) {
    let request: Request = match serde_json::from_slice(raw) {
        Ok(r) => r,
        Err(err) => {
            debug!(error = %err, "failed to decode request frame");
            return (Response::err(DispatchError::Parse(err).to_string()), None);
        }
    };

    let params = request.params.unwrap_or(serde_json::Value::Null);

    macro_rules! decode {
        ($ty:ty) => {
            match serde_json::from_value::<$ty>(params) {
                Ok(p) => p,
                Err(err) => {
                    let msg = DispatchError::InvalidParams(err.to_string()).to_string();
                    return (Response::err(msg), None);
                }
            }
        };
    }

    match request.method.as_str() {
        "configure" => reply(backend.configure(decode!(ConfigureParams)).await),
        "createVM" => reply(backend.create_vm(decode!(NameParams)).await),
        "startVM" => reply(backend.start_vm(decode!(NameParams)).await),
        "stopVM" => reply(backend.stop_vm(decode!(NameParams)).await),
        "isRunning" => reply(backend.is_running(decode!(NameParams)).await),
        "isGuestConnected" => reply(backend.is_guest_connected(decode!(NameParams)).await),
        "spawn" => reply(backend.spawn(decode!(SpawnParams)).await),
        "kill" => reply(backend.kill(decode!(KillParams)).await),
        "writeStdin" => reply(backend.write_stdin(decode!(WriteStdinParams)).await),
        "isProcessRunning" => reply(backend.is_process_running(decode!(ProcessIdParams)).await),
        "mountPath" => reply(backend.mount_path(decode!(MountPathParams)).await),
        "readFile" => reply(backend.read_file(decode!(ReadFileParams)).await),
        "installSdk" => reply(backend.install_sdk(decode!(NameParams)).await),
        "addApprovedOauthToken" => reply(
            backend
                .add_approved_oauth_token(decode!(AddApprovedOauthTokenParams))
                .await,
        ),
        "setDebugLogging" => reply(backend.set_debug_logging(decode!(SetDebugLoggingParams)).await),
        "subscribeEvents" => {
            let params = decode!(NameParams);
            match backend.subscribe_events(params, sink).await {
                Ok((subscription, result)) => (ok(&result), Some(subscription)),
                Err(err) => (Response::err(err.to_string()), None),
            }
        }
        "getDownloadStatus" => reply(backend.get_download_status().await),
        other => {
            warn!(method = other, "unknown RPC method");
            (
                Response::err(DispatchError::UnknownMethod(other.to_string()).to_string()),
                None,
            )
        }
    }
}

fn reply<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> (Response, Option<Subscription>) {
    match result {
        Ok(value) => (ok(&value), None),
        Err(err) => (Response::err(err.to_string()), None),
    }
}

fn ok<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(v) => Response::ok(v),
        Err(err) => Response::err(format!("failed to serialize result: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use supervisor::HostBackend;

    struct NullSink;

    #[async_trait::async_trait]
    impl EventSink for NullSink {
        async fn emit(&self, _event: &wire::Event) -> bool {
            true
        }
    }

    fn backend() -> HostBackend {
        HostBackend::new(Arc::new(supervisor::EventBus::new()))
    }

    #[tokio::test]
    async fn unknown_method_reports_method_not_found() {
        let backend = backend();
        let raw = br#"{"method":"frobnicate"}"#;
        let (response, sub) = dispatch(raw, &backend, Arc::new(NullSink)).await;
        assert!(sub.is_none());
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "Method not found: frobnicate");
    }

    #[tokio::test]
    async fn malformed_frame_reports_parse_error() {
        let backend = backend();
        let (response, _) = dispatch(b"not json", &backend, Arc::new(NullSink)).await;
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "Parse error");
    }

    #[tokio::test]
    async fn invalid_params_reports_detail() {
        let backend = backend();
        let raw = br#"{"method":"kill","params":{}}"#;
        let (response, _) = dispatch(raw, &backend, Arc::new(NullSink)).await;
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["success"], false);
        assert!(v["error"].as_str().unwrap().starts_with("Invalid params:"));
    }

    #[tokio::test]
    async fn get_download_status_round_trips() {
        let backend = backend();
        let raw = br#"{"method":"getDownloadStatus"}"#;
        let (response, _) = dispatch(raw, &backend, Arc::new(NullSink)).await;
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["result"]["status"], "Ready");
    }

    #[tokio::test]
    async fn subscribe_events_returns_subscription_and_ack() {
        let backend = backend();
        let raw = br#"{"method":"subscribeEvents","params":{"name":""}}"#;
        let (response, sub) = dispatch(raw, &backend, Arc::new(NullSink)).await;
        assert!(sub.is_some());
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["result"]["subscribed"], true);
    }
}
