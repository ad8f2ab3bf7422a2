//! Terminal Smoke Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Wiring static collaborator implementations (tokens, curriculum,
//!    evaluation) suitable for development.
//! 3. Spawning the session engine and connecting a standalone session.
//! 4. Forwarding stdin lines as learner turns and printing session events.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tutor_client::auth::StaticTokenProvider;
use tutor_client::{EngineConfig, HintLevel, SessionDeps, SessionEvent, SessionHandle};
use tutor_core::activity::ActivityContext;
use tutor_core::curriculum::StaticCurriculumService;
use tutor_core::evaluation::StaticEvaluationService;

/// Connects a standalone tutoring session from the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Overrides TUTOR_SERVICE_URL.
    #[arg(long)]
    url: Option<String>,

    /// Kind of activity to present to the tutor.
    #[arg(long, default_value = "scratchpad")]
    activity_type: String,

    /// Identifier of the activity instance.
    #[arg(long, default_value = "demo-1")]
    instance_id: String,

    /// Topic shown to the tutor, if any.
    #[arg(long)]
    topic: Option<String>,

    /// Enable microphone capture and speech playback.
    #[arg(long)]
    voice: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = args.url {
        config.service_url = url;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    // --- 3. Wire Collaborators ---
    let token = std::env::var("TUTOR_AUTH_TOKEN").unwrap_or_else(|_| "dev-token".to_string());
    let deps = SessionDeps {
        tokens: Arc::new(StaticTokenProvider::new(token)),
        curriculum: Arc::new(StaticCurriculumService::default()),
        evaluation: Arc::new(StaticEvaluationService::default()),
    };

    // --- 4. Spawn the Engine and Connect ---
    let (session, mut events) = SessionHandle::spawn(config, deps);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Turn(turn) => println!(
                    "[{} {}] {}",
                    turn.timestamp.format("%H:%M:%S"),
                    turn.role,
                    turn.content
                ),
                SessionEvent::ConnectionStateChanged(state) => info!(%state, "connection"),
                SessionEvent::ActivityChanged { instance_id } => {
                    info!(%instance_id, "active activity")
                }
                SessionEvent::Reconnected => info!("reconnected, context replayed"),
                SessionEvent::Disconnected => info!("session ended"),
                SessionEvent::FatalError { message } => eprintln!("fatal: {message}"),
                SessionEvent::ServiceError { message } => eprintln!("service error: {message}"),
                SessionEvent::VoiceDisabled { reason } => eprintln!("voice disabled: {reason}"),
            }
        }
    });

    let activity = ActivityContext {
        activity_type: args.activity_type,
        instance_id: args.instance_id,
        payload: serde_json::Value::Null,
        lesson_id: None,
        topic: args.topic,
        grade_level: None,
    };
    session.connect(activity).await?;
    info!("connected; type to talk, `/hint 1..3` for a hint, `/quit` to leave");

    if args.voice {
        if let Err(e) = session.set_voice(true).await {
            eprintln!("voice unavailable, continuing text-only: {e}");
        }
    }

    // --- 5. Forward stdin ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(level) = line.strip_prefix("/hint ") {
            match level.trim().parse::<u8>().ok().and_then(HintLevel::from_u8) {
                Some(level) => session.request_hint(level).await?,
                None => eprintln!("hint level must be 1, 2, or 3"),
            }
            continue;
        }
        session.send_text(line).await?;
    }

    session.disconnect().await.ok();
    Ok(())
}
