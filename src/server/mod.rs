pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::llm::chat::ChatClient;
use crate::llm::ModelConfig;
use crate::render::Renderer;
use crate::session::{ SessionController, SessionOptions };
use log::info;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Immutable state shared by every connection. Each WebSocket connection
/// builds its own [`SessionController`] from it.
pub struct AppContext {
    pub client: Arc<dyn ChatClient>,
    pub renderer: Renderer,
    pub defaults: ModelConfig,
    pub options: SessionOptions,
    pub ws_port: u16,
}

impl AppContext {
    pub fn new_session(&self) -> SessionController {
        SessionController::new(Arc::clone(&self.client), self.defaults.clone(), self.options.clone())
    }
}

pub struct Server {
    http_addr: String,
    ws_addr: String,
    client: Arc<dyn ChatClient>,
    args: Args,
}

impl Server {
    pub fn new(client: Arc<dyn ChatClient>, args: Args) -> Self {
        Self {
            http_addr: args.http_addr.clone(),
            ws_addr: args.ws_addr.clone(),
            client,
            args,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let ws_listener = TcpListener::bind(&self.ws_addr).await?;
        let ws_port = ws_listener.local_addr()?.port();

        let context = Arc::new(AppContext {
            client: Arc::clone(&self.client),
            renderer: Renderer::new(),
            defaults: self.args.model_config()?,
            options: self.args.session_options(),
            ws_port,
        });

        self.start_http_server(Arc::clone(&context)).await?;
        info!("WS server listening on: {}", ws_listener.local_addr()?);
        websocket::serve(ws_listener, context).await
    }

    async fn start_http_server(
        &self,
        context: Arc<AppContext>
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.http_addr.parse::<SocketAddr>()?;
        api::start_http_server(addr, context).await
    }
}
