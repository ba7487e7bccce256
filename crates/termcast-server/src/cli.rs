use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::web::{ManagerSettings, WebServerConfig};

/// Default tracing filter when neither `--log-level` nor `RUST_LOG` is set
pub const DEFAULT_LOG_FILTER: &str = "termcast=info,termcast_server=info,termcast_terminal=info";

/// CLI arguments for termcast
#[derive(Parser, Debug, Clone)]
#[command(name = "termcast")]
#[command(about = "Stream live terminal sessions to websocket viewers")]
#[command(version)]
pub struct Cli {
    /// Address to bind the web server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Lines of scrollback kept per session
    #[arg(long, env = "HISTORY_LIMIT", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub history_limit: u64,

    /// Coalescing window for screen patches, in milliseconds
    #[arg(long, env = "DEBOUNCE_MS", default_value_t = 50)]
    pub debounce_ms: u64,

    /// Seconds between heartbeat pings to viewers
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = 20,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_secs: u64,

    /// Directory of static viewer assets to serve
    #[arg(long, env = "STATIC_DIR", value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// Tracing filter directives (e.g. "termcast=debug")
    #[arg(long, env = "RUST_LOG", value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            history_limit: usize::try_from(self.history_limit).unwrap_or(usize::MAX),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    pub fn server_config(&self) -> Result<WebServerConfig> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.host))?;

        Ok(WebServerConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            static_dir: self.static_dir.clone(),
            manager: self.manager_settings(),
        })
    }

    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
