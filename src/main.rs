use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use http::{Method, header::CONTENT_TYPE};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use walkman::{
    WalkmanConfig,
    core::playback::{ClockTransport, PlaybackController},
    core::realtime::{LoggingAudioSink, RealtimeEvent, SessionConnection, StaticMicrophone},
    routes,
    state::AppState,
};

/// Walkman - voice-controlled playback over a realtime speech session
#[derive(Parser, Debug)]
#[command(name = "walkman")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the token broker
    Serve,

    /// Run a voice session against a simulated player
    Session {
        /// Starting playback position in seconds
        #[arg(long, default_value_t = 0.0)]
        position: f64,

        /// Start with playback paused
        #[arg(long)]
        paused: bool,

        /// Run without audio devices: a silent microphone track and remote
        /// audio that is only counted
        #[arg(long)]
        headless: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        WalkmanConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        WalkmanConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Session {
            position,
            paused,
            headless,
        } => run_session(config, position, paused, headless).await,
    }
}

async fn serve(config: WalkmanConfig) -> anyhow::Result<()> {
    if config.api_key().is_err() {
        warn!("OPENAI_API_KEY is not set, /token will fail");
    }

    let address = config.address();
    let app_state = AppState::new(config)?;

    // The session client may run on another origin
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(false);

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::api::create_api_router()
        .with_state(app_state)
        .layer(cors_layer)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Token broker listening on http://{}", socket_addr);
    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_session(
    config: WalkmanConfig,
    position: f64,
    paused: bool,
    headless: bool,
) -> anyhow::Result<()> {
    let transport = if paused {
        ClockTransport::new(position)
    } else {
        ClockTransport::playing(position)
    };
    let playback = Arc::new(PlaybackController::new(Arc::new(transport)));

    let mut builder = SessionConnection::builder_from_config(&config, playback.clone())?;
    if headless {
        builder = builder
            .microphone(Arc::new(StaticMicrophone::default()))
            .remote_audio(Arc::new(LoggingAudioSink::default()));
    }
    let session = builder.build();
    session
        .event_bus()
        .tap(Arc::new(|event: &RealtimeEvent| {
            info!(event_type = %event.event_type, "Server event");
        }));

    let mut state_rx = session.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            info!(%state, "Session state changed");
        }
    });

    session.start_session().await?;
    info!("Type a line to send it as a text message, Ctrl-C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line? {
                    Some(text) if !text.trim().is_empty() => {
                        if !session.send_text_message(text) {
                            warn!(state = %session.state(), "Session not active, message dropped");
                        }
                        let state = playback.state();
                        info!(
                            playing = state.playing,
                            position = %format!("{:.1}", state.position),
                            "Playback"
                        );
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    session.stop_session().await;
    Ok(())
}
