//! Lagoon token retrieval over SSH
//!
//! The Lagoon SSH service answers the `token` command with a short-lived
//! bearer token for the API.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use ssh2::Session;
use tracing::debug;

use restore_task_common::Error;

/// SSH user of the Lagoon token service
pub const TOKEN_USER: &str = "lagoon";
/// Command that prints a token
pub const TOKEN_COMMAND: &str = "token";
/// Connect and session timeout for the token service
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Token service endpoint and credentials
#[derive(Clone, Debug)]
pub struct TokenSource {
    host: String,
    port: u16,
    key: PathBuf,
    timeout: Duration,
}

impl TokenSource {
    /// Token source authenticating with the private key at `key`
    pub fn new(host: impl Into<String>, port: u16, key: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            key: key.into(),
            timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retrieve a token, once, without retries
    pub async fn retrieve(&self) -> Result<String, Error> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.retrieve_blocking())
            .await
            .map_err(|e| Error::internal_with_context("token", e.to_string()))?
    }

    fn retrieve_blocking(&self) -> Result<String, Error> {
        let address = self.address();
        let err = |msg: String| Error::token(address.clone(), msg);

        let addr = address
            .to_socket_addrs()
            .map_err(|e| err(format!("failed to resolve: {}", e)))?
            .next()
            .ok_or_else(|| err("no address resolved".to_string()))?;
        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| err(format!("failed to connect: {}", e)))?;

        let mut session =
            Session::new().map_err(|e| err(format!("failed to create session: {}", e)))?;
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| err(format!("handshake failed: {}", e)))?;
        session
            .userauth_pubkey_file(TOKEN_USER, None, &self.key, None)
            .map_err(|e| {
                err(format!(
                    "authentication with {} failed: {}",
                    self.key.display(),
                    e
                ))
            })?;

        let mut channel = session
            .channel_session()
            .map_err(|e| err(format!("failed to open channel: {}", e)))?;
        channel
            .exec(TOKEN_COMMAND)
            .map_err(|e| err(format!("failed to run {}: {}", TOKEN_COMMAND, e)))?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| err(format!("failed to read token: {}", e)))?;
        channel
            .wait_close()
            .map_err(|e| err(format!("failed to close channel: {}", e)))?;

        let status = channel
            .exit_status()
            .map_err(|e| err(format!("failed to read exit status: {}", e)))?;
        if status != 0 {
            return Err(err(format!("{} exited with status {}", TOKEN_COMMAND, status)));
        }
        debug!(host = %address, "Retrieved Lagoon token");
        parse_token(&output).ok_or_else(|| err("empty token".to_string()))
    }
}

/// Trim the command output to the bare token
pub fn parse_token(output: &str) -> Option<String> {
    let token = output.trim();
    (!token.is_empty()).then(|| token.to_string())
}
