//! Binary entrypoint for the escalation gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use escalation_engine::Engine;
use escalation_gateway::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let port: u16 = std::env::var("PORT")
    .unwrap_or_else(|_| "5005".into())
    .parse()
    .map_err(|e| format!("PORT must be a valid u16: {}", e))?;

  let engine = Engine::from_env()?;
  let app = escalation_gateway::router(Arc::new(AppState::new(engine)));

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  info!(%addr, "escalation-gateway listening");

  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, app).await?;

  Ok(())
}
