//! Tor-backed identity rotation.
//!
//! Traffic goes through the Tor SOCKS port; rotation asks the control port
//! for a fresh circuit with `SIGNAL NEWNYM`.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use super::{DEFAULT_SETTLE, Identity, IdentityRotator};
use crate::config::duration_secs;
use crate::fetcher::ResourceError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// SOCKS endpoint handed to the transport. `socks5h` keeps DNS inside Tor.
    pub socks_proxy: String,
    pub control_addr: String,
    /// `None` sends a bare `AUTHENTICATE` (null auth or cookie-less setups).
    pub control_password: Option<String>,
    #[serde(with = "duration_secs")]
    pub settle: Duration,
    #[serde(with = "duration_secs")]
    pub control_timeout: Duration,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_proxy: "socks5h://127.0.0.1:9150".into(),
            control_addr: "127.0.0.1:9151".into(),
            control_password: None,
            settle: DEFAULT_SETTLE,
            control_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum TorControlError {
    #[error("control port i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("control port did not answer within {0:?}")]
    Timeout(Duration),
    #[error("control port rejected command: {0}")]
    Rejected(String),
    #[error("control port closed the connection")]
    Closed,
    #[error("cannot read auth cookie {path}: {source}")]
    CookieFile { path: String, source: io::Error },
}

/// Rotates the Tor circuit behind a fixed SOCKS endpoint.
#[derive(Debug)]
pub struct TorRotator {
    config: TorConfig,
    generation: u64,
}

impl TorRotator {
    /// Verifies the control port is reachable and accepts our credentials.
    pub async fn connect(config: TorConfig) -> Result<Self, ResourceError> {
        control_session(&config, &[])
            .await
            .map_err(|source| ResourceError::TorControl {
                addr: config.control_addr.clone(),
                source,
            })?;
        log::info!(
            "tor control port {} ready, routing through {}",
            config.control_addr,
            config.socks_proxy
        );
        Ok(Self {
            config,
            generation: 0,
        })
    }
}

#[async_trait]
impl IdentityRotator for TorRotator {
    fn current(&self) -> Identity {
        Identity::via_proxy(self.config.socks_proxy.clone(), self.generation)
    }

    async fn rotate(&mut self) {
        match control_session(&self.config, &["SIGNAL NEWNYM"]).await {
            Ok(()) => {
                self.generation += 1;
                log::info!(
                    "requested new tor circuit (generation {}), settling for {:.1}s",
                    self.generation,
                    self.config.settle.as_secs_f64()
                );
                sleep(self.config.settle).await;
            }
            Err(err) => log::warn!("tor identity rotation failed: {err}"),
        }
    }
}

async fn control_session(config: &TorConfig, commands: &[&str]) -> Result<(), TorControlError> {
    let session = async {
        let stream = TcpStream::connect(&config.control_addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let auth = authenticate_command(config, &mut reader, &mut write_half).await?;
        exchange(&mut reader, &mut write_half, &auth).await?;

        for command in commands {
            exchange(&mut reader, &mut write_half, &format!("{command}\r\n")).await?;
        }

        let _ = write_half.write_all(b"QUIT\r\n").await;
        Ok::<(), TorControlError>(())
    };

    timeout(config.control_timeout, session)
        .await
        .map_err(|_| TorControlError::Timeout(config.control_timeout))?
}

/// Picks the `AUTHENTICATE` line. A configured password wins; otherwise the
/// methods advertised by `PROTOCOLINFO` decide between null and cookie auth.
async fn authenticate_command<R, W>(
    config: &TorConfig,
    reader: &mut R,
    writer: &mut W,
) -> Result<String, TorControlError>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(ref password) = config.control_password {
        return Ok(format!("AUTHENTICATE \"{}\"\r\n", quote(password)));
    }

    let reply = exchange(reader, writer, "PROTOCOLINFO 1\r\n").await?;
    let info = AuthInfo::parse(&reply);
    if info.supports("NULL") {
        return Ok("AUTHENTICATE\r\n".to_string());
    }
    if info.supports("COOKIE") {
        if let Some(path) = info.cookie_file {
            let cookie = tokio::fs::read(&path)
                .await
                .map_err(|source| TorControlError::CookieFile { path, source })?;
            log::debug!("authenticating to tor control port with auth cookie");
            return Ok(format!("AUTHENTICATE {}\r\n", hex::encode(cookie)));
        }
    }

    log::debug!("tor control port offers {:?}, trying bare AUTHENTICATE", info.methods);
    Ok("AUTHENTICATE\r\n".to_string())
}

/// The `AUTH` line of a `PROTOCOLINFO` reply.
#[derive(Debug, Default, PartialEq)]
struct AuthInfo {
    methods: Vec<String>,
    cookie_file: Option<String>,
}

impl AuthInfo {
    fn parse(reply: &[String]) -> Self {
        let Some(auth) = reply
            .iter()
            .filter_map(|line| line.get(4..))
            .find(|line| line.starts_with("AUTH "))
        else {
            return Self::default();
        };

        let methods = auth
            .split_whitespace()
            .find_map(|token| token.strip_prefix("METHODS="))
            .map(|list| list.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        let cookie_file = auth
            .find("COOKIEFILE=\"")
            .map(|at| unquote(&auth[at + "COOKIEFILE=\"".len()..]));

        Self {
            methods,
            cookie_file,
        }
    }

    fn supports(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Reads a control-port quoted string up to its closing quote.
fn unquote(raw: &str) -> String {
    let mut out = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Sends one command and returns every line of the reply.
async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    line: &str,
) -> Result<Vec<String>, TorControlError>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    // Multi-line replies use "250-"; the final line uses "250 ".
    let mut reply = Vec::new();
    loop {
        let mut next = String::new();
        if reader.read_line(&mut next).await? == 0 {
            return Err(TorControlError::Closed);
        }
        let last = next.as_bytes().get(3) != Some(&b'-');
        reply.push(next.trim_end().to_string());
        if last {
            break;
        }
    }

    match reply.last() {
        Some(last) if last.starts_with("250") => Ok(reply),
        Some(last) => Err(TorControlError::Rejected(last.clone())),
        None => Err(TorControlError::Closed),
    }
}

fn quote(password: &str) -> String {
    password.replace('\\', "\\\\").replace('"', "\\\"")
}
