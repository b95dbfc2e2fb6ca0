use std::net::{IpAddr, SocketAddr};

use log::info;
use warp::Filter;

use super::handlers::AppState;
use super::routes::*;
use crate::configuration::Config;
use crate::error_handling::types::WebError;
use crate::session_management::session_manager::SessionManager;
use crate::storage::DatabaseStorage;

/// Web server for the study API and the admin endpoints
pub struct WebServer {
    state: AppState,
    addr: SocketAddr,
}

impl WebServer {
    /// Create a new WebServer bound to the configured address once started
    pub fn new(
        manager: SessionManager,
        storage: DatabaseStorage,
        config: &Config,
    ) -> Result<Self, WebError> {
        let ip: IpAddr = config.server.bind_address.parse().map_err(|e| {
            WebError::BindFailed(format!("{}: {}", config.server.bind_address, e))
        })?;
        Ok(Self {
            state: AppState {
                manager,
                storage,
                study: config.study.clone(),
                admin_token: config.admin.token.clone(),
            },
            addr: SocketAddr::new(ip, config.server.port),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the process is stopped
    pub async fn start(&self) -> Result<(), WebError> {
        let state = self.state.clone();

        // Compose routes
        let routes = scenarios_route(state.clone())
            .or(start_session_route(state.clone()))
            .or(get_session_route(state.clone()))
            .or(progress_route(state.clone()))
            .or(complete_route(state.clone()))
            .or(admin_routes(state))
            .recover(handle_rejection)
            .with(warp::log("annostudy::http"));

        info!("Web interface listening on http://{}", self.addr);
        warp::serve(routes).run(self.addr).await;

        Ok(())
    }
}
