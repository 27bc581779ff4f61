use std::sync::Arc;

use anyhow::Result;
use chatrelay::{InMemoryConversationStore, OpenAiResponses, RequestOrchestrator, SupabaseIdentity};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod routes;
mod settings;
mod shutdown;

use settings::{Args, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("chatrelay=info,chatrelay_service=info,tower_http=info")
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let settings = Settings::from_args(Args::parse())?;

    info!(
        addr = %settings.addr,
        model = %settings.chat.model,
        upstream = %settings.openai_base_url,
        identity = %settings.supabase_url,
        "starting service"
    );

    let api = OpenAiResponses::new(settings.openai_key, settings.openai_base_url);
    let oracle = SupabaseIdentity::new(settings.supabase_url, settings.supabase_anon_key);
    let orchestrator = RequestOrchestrator::new(
        settings.chat,
        Arc::new(api),
        Arc::new(oracle),
        Arc::new(InMemoryConversationStore::new()),
    );

    let app = routes::router(Arc::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&settings.addr).await?;
    info!(addr = %settings.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::with_deadline(shutdown::SHUTDOWN_DEADLINE))
        .await?;

    info!("server closed");
    Ok(())
}
