//! termcast server library
//!
//! Session management, the versioned websocket protocol and the HTTP surface
//! for streaming live terminal sessions to browser viewers.

pub use termcast_terminal as terminal;

pub mod app;
pub mod cli;
pub mod web;

pub use app::{init_tracing, run_web_server};
pub use cli::Cli;
pub use web::{ManagerSettings, SessionManager, WebServer, WebServerConfig};
