// Web transport module
pub mod protocol;
pub mod routes;
pub mod server;
pub mod session;
pub mod session_manager;
pub mod transport;

pub use protocol::{ClientMessage, ServerFrame, ServerMessage, SessionId, SessionSummary};
pub use server::{WebServer, WebServerConfig};
pub use session_manager::{ManagerSettings, SessionError, SessionManager};
pub use transport::Outbound;
