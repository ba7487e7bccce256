use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::web::{
    routes,
    session_manager::{ManagerSettings, SessionManager},
};

/// Default interval between unsolicited pings
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    pub bind_addr: SocketAddr,
    pub heartbeat: Duration,
    pub static_dir: Option<PathBuf>,
    pub manager: ManagerSettings,
}

/// Web server instance
pub struct WebServer {
    config: WebServerConfig,
    session_manager: Arc<SessionManager>,
}

impl WebServer {
    /// Create a new web server backed by native PTYs
    pub fn new(config: WebServerConfig) -> Self {
        let session_manager = Arc::new(SessionManager::new(config.manager.clone()));
        Self::with_manager(config, session_manager)
    }

    pub fn with_manager(config: WebServerConfig, session_manager: Arc<SessionManager>) -> Self {
        Self {
            config,
            session_manager,
        }
    }

    /// Build the full application router
    pub fn router(&self) -> Router {
        let app_state = routes::AppState {
            session_manager: self.session_manager.clone(),
        };

        let mut app = routes::create_router(app_state);

        // Serve static files for anything the API does not claim
        if let Some(static_dir) = &self.config.static_dir {
            if static_dir.exists() {
                tracing::info!(dir = %static_dir.display(), "Serving static files");
                app = app.fallback_service(ServeDir::new(static_dir));
            } else {
                tracing::warn!(dir = %static_dir.display(), "Static directory does not exist");
            }
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Start the web server
    pub async fn start(self) -> Result<()> {
        let app = self.router();
        let heartbeat = spawn_heartbeat(self.session_manager.clone(), self.config.heartbeat);

        tracing::info!(addr = %self.config.bind_addr, "Web server starting");
        tracing::info!("   WebSocket endpoint: ws://{}/ws/term?session_id={{id}}", self.config.bind_addr);
        tracing::info!("   API endpoints: http://{}/api/sessions", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr).await?;
        let served = axum::serve(listener, app).await;
        heartbeat.abort();
        served?;

        Ok(())
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.session_manager.clone()
    }
}

/// Ping every attached viewer on a fixed interval
pub fn spawn_heartbeat(manager: Arc<SessionManager>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            manager.heartbeat().await;
        }
    })
}
