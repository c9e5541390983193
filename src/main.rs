use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use spyne_query::{EngineConfig, ExecuteOptions, ExecutionMode, QueryIntent, QueryService, StreamEvent};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Plain,
    Paginated,
    Streamed,
}

#[derive(Parser)]
#[command(name = "spyne-query")]
#[command(about = "Turns a natural-language question into validated SQL and runs it")]
struct Args {
    /// The question in natural language
    query: String,

    /// JSON config file; environment variables override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "anonymous")]
    user: String,

    #[arg(long)]
    session: Option<String>,

    #[arg(long, value_enum, default_value = "plain")]
    mode: Mode,

    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long)]
    chunk_size: Option<usize>,

    /// Embed schema text locally instead of calling the embeddings API
    #[arg(long)]
    offline_embeddings: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let mut config = EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => EngineConfig::from_env()?,
    };

    let mode = match args.mode {
        Mode::Plain => ExecutionMode::Plain,
        Mode::Paginated => ExecutionMode::Paginated {
            page: args.page,
            page_size: args.page_size.unwrap_or(config.execution.default_page_size),
        },
        Mode::Streamed => ExecutionMode::Streamed {
            chunk_size: args.chunk_size.unwrap_or(config.execution.chunk_size),
        },
    };

    info!("Query: {}", args.query);
    let service = QueryService::from_config(config, args.offline_embeddings)
        .await
        .context("Failed to initialize query service")?;

    let intent = QueryIntent::new(args.query);
    let options = ExecuteOptions {
        user_id: args.user,
        session_id: args.session,
        mode,
    };

    if let ExecutionMode::Streamed { .. } = mode {
        let mut events = service.execute_stream(&intent, &options).await;
        while let Some(event) = events.recv().await {
            println!("{}", serde_json::to_string(&event)?);
            if let StreamEvent::Error { .. } = event {
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    match service.execute(&intent, &options).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e.user_message());
            std::process::exit(1);
        }
    }
}
