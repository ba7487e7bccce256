// Application bootstrap
pub mod logging;
pub mod web_server;

pub use logging::init_tracing;
pub use web_server::run_web_server;
