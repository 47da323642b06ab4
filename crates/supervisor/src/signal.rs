use nix::sys::signal::Signal;

/// Translates a client-supplied signal name (`KILL`, `SIGKILL`, `kill`, ...)
/// into a POSIX `Signal`, stripping an optional `SIG` prefix case-insensitively
/// and falling back to `SIGTERM` for anything unrecognized or empty (§4.3).
pub fn parse_signal(name: &str) -> Signal {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Signal::SIGTERM;
    }
    let upper = trimmed.to_ascii_uppercase();
    let stripped = upper.strip_prefix("SIG").unwrap_or(&upper);
    match stripped {
        "KILL" => Signal::SIGKILL,
        "TERM" => Signal::SIGTERM,
        "INT" => Signal::SIGINT,
        "QUIT" => Signal::SIGQUIT,
        "HUP" => Signal::SIGHUP,
        "USR1" => Signal::SIGUSR1,
        "USR2" => Signal::SIGUSR2,
        _ => Signal::SIGTERM,
    }
}

/// Canonical name for a signal number as delivered by `WIFSIGNALED`/`WTERMSIG`,
/// used on the `exit` event's `signal` field (§4.3). Unknown numbers become
/// `SIG<n>` rather than being dropped.
pub fn signal_name(raw: i32) -> String {
    match raw {
        x if x == Signal::SIGTERM as i32 => "SIGTERM".to_string(),
        x if x == Signal::SIGKILL as i32 => "SIGKILL".to_string(),
        x if x == Signal::SIGINT as i32 => "SIGINT".to_string(),
        x if x == Signal::SIGQUIT as i32 => "SIGQUIT".to_string(),
        x if x == Signal::SIGHUP as i32 => "SIGHUP".to_string(),
        x if x == Signal::SIGUSR1 as i32 => "SIGUSR1".to_string(),
        x if x == Signal::SIGUSR2 as i32 => "SIGUSR2".to_string(),
        x if x == Signal::SIGPIPE as i32 => "SIGPIPE".to_string(),
        x if x == Signal::SIGABRT as i32 => "SIGABRT".to_string(),
        x if x == Signal::SIGSEGV as i32 => "SIGSEGV".to_string(),
        other => format!("SIG{other}"),
    }
}
