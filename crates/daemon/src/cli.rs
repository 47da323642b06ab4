use std::path::PathBuf;

use clap::Parser;

/// Default socket filename, joined onto a runtime directory (§4.6).
const SOCKET_FILE_NAME: &str = "cowork-vm-service.sock";

#[derive(Debug, Parser)]
#[command(name = "cowork-daemon")]
#[command(about = "Local backend for driving agentic CLI tools over the cowork wire protocol")]
#[command(version)]
pub struct Cli {
    /// Path to the Unix domain socket to listen on. Defaults to
    /// `$XDG_RUNTIME_DIR/cowork-vm-service.sock`, falling back to the shared
    /// temp directory when that variable is unset.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Enable debug-level logging (equivalent to `setDebugLogging` at
    /// startup, without waiting for a client to ask for it).
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn socket_path(&self) -> PathBuf {
        self.socket.clone().unwrap_or_else(default_socket_path)
    }
}

fn default_socket_path() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    dir.join(SOCKET_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_socket_flag_wins_over_default() {
        let cli = Cli {
            socket: Some(PathBuf::from("/tmp/explicit.sock")),
            debug: false,
        };
        assert_eq!(cli.socket_path(), PathBuf::from("/tmp/explicit.sock"));
    }
}
