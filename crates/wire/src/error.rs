use thiserror::Error;

/// Errors produced while parsing and dispatching one request frame.
///
/// The `Display` of each variant is, verbatim, the wire-level error message
/// spec.md mandates (§4.2, §7) — dispatchers should use `.to_string()`
/// directly rather than re-deriving these strings.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Parse error")]
    Parse(#[source] serde_json::Error),
    #[error("Method not found: {0}")]
    UnknownMethod(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
}
