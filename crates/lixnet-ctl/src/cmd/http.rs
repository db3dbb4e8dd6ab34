//! Shared RPC helpers for CLI commands.

use lixnet_rpc::{RpcClient, RpcClientError};

pub fn rpc_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/rpc", port)
}

pub fn client(port: u16) -> RpcClient {
    RpcClient::new(rpc_url(port))
}

/// Human-readable message for a failed call, with a hint when the daemon
/// is not reachable.
pub fn describe(error: &RpcClientError) -> String {
    match error {
        RpcClientError::Http { url, .. } => {
            format!("failed to connect to lixnetd at {} (is it running?)", url)
        }
        RpcClientError::Server {
            status,
            error,
            details: Some(details),
        } => format!("{} ({}): {}", error, status, details),
        RpcClientError::Server { status, error, .. } => format!("{} ({})", error, status),
        other => other.to_string(),
    }
}
