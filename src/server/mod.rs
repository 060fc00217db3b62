pub mod api;
pub mod websocket;

use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;

use crate::agent::ChatAgent;
use crate::avatar::Avatar;
use crate::cli::Args;
use crate::config::persona::Persona;

/// Everything a connection or request handler needs. Sessions are not shared: every
/// WebSocket connection builds its own.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ChatAgent>,
    pub persona: Arc<Persona>,
    pub avatar: Option<Arc<Avatar>>,
}

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        match self.args.http_port {
            Some(http_port) => self.start_http_server(http_port).await?,
            None => warn!("HTTP_PORT not set, HTTP API disabled"),
        }

        info!("Starting WebSocket server on: {}", self.addr);
        self.start_ws_server().await
    }

    async fn start_http_server(&self, http_port: u16) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(http_port, self.state.clone(), self.args.clone()).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(&self.addr, self.state.clone(), &self.args).await
    }
}
