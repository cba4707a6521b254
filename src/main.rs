use claude_bridge::{build_router, AppState, DebugSink, ProxyConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Reverse proxy that lets Anthropic Messages API clients talk to any OpenAI-compatible endpoint",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream provider preset (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Directory for per-request debug dumps (overrides config)
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. claude-bridge.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/claude-bridge/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/claude-bridge/config.toml");
            println!("     ~/.config/claude-bridge/config.toml");
        }
        println!("  3. ~/.claude-bridge.toml");
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = cli.provider {
        config.upstream.provider = Some(provider);
        config.upstream.base_url = None;
    }
    if let Some(debug_dir) = cli.debug_dir {
        config.debug.dump_dir = Some(debug_dir);
    }

    // Validate config eagerly
    let base_url = config.effective_base_url()?;
    let key_mode = match config.resolve_api_key()? {
        Some(_) => "configured key",
        None => "forwarded client credential",
    };

    let debug = match config.debug.dump_dir {
        Some(ref dir) => DebugSink::open(dir)?,
        None => DebugSink::disabled(),
    };

    info!("claude-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:   {}", base_url);
    info!("  Model:      {}", config.upstream.model);
    info!("  Auth:       {}", key_mode);
    info!("  Port:       {}", config.port);
    if let Some(ref dir) = config.debug.dump_dir {
        info!("  Debug dir:  {}", dir.display());
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        debug,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with an Anthropic-API client:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{} <client>", config.port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
