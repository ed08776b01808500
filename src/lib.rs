pub mod api;
pub mod error;
pub mod health;
pub mod media;
pub mod models;
pub mod realtime;
pub mod session;
pub mod settings;
pub mod timeline;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use uuid::Uuid;

use api::RoomsClient;
use media::hls::{HlsSourceFactory, HttpManifestLoader};
use models::LifecycleState;
use realtime::{sse::SseTransport, RealtimeHub};
use session::{commands, SessionConfig, SessionController, SessionDeps};
use settings::{default_settings_path, SettingsStore};

/// Command-line arguments for tarteel-sync
#[derive(Parser, Debug)]
#[command(name = "tarteel-sync")]
#[command(about = "Follow a prayer room's broadcast and show where it is")]
#[command(version)]
struct Args {
    /// Room to follow
    room_id: Uuid,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "TARTEEL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Bearer token for the rooms service
    #[arg(long)]
    token: Option<String>,

    /// Local user id, needed for creator-only commands
    #[arg(long)]
    user_id: Option<String>,

    /// Start the room once loaded (creator only)
    #[arg(long)]
    start: bool,

    /// Invite a friend to the room (creator only); may be repeated
    #[arg(long = "invite", value_name = "FRIEND_ID")]
    invites: Vec<String>,

    /// Persist --token and --user-id to the settings file
    #[arg(long)]
    save: bool,
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let store = SettingsStore::new(settings_path)?;
    info!("Using settings at {}", store.path().display());

    if args.save {
        store.update(|s| {
            if let Some(token) = &args.token {
                s.auth_token = Some(token.clone());
            }
            if let Some(user_id) = &args.user_id {
                s.user_id = Some(user_id.clone());
            }
        })?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(follow(args, store))
}

async fn follow(args: Args, store: SettingsStore) -> Result<()> {
    let mut settings = store.effective();
    if let Some(token) = args.token.clone() {
        settings.auth_token = Some(token);
    }
    if let Some(user_id) = args.user_id.clone() {
        settings.user_id = Some(user_id);
    }
    settings.validate()?;
    let endpoints = settings.endpoints()?;

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let transport = SseTransport::new(
        client.clone(),
        endpoints.realtime.clone(),
        settings.auth_token.clone(),
    );
    let loader = HttpManifestLoader::new(client.clone());
    let deps = SessionDeps {
        api: Arc::new(RoomsClient::new(
            client,
            &endpoints.api_base,
            settings.auth_token.clone(),
        )),
        hub: RealtimeHub::new(Arc::new(transport)),
        media: Arc::new(HlsSourceFactory::new(
            Arc::new(loader),
            Duration::from_millis(settings.manifest_poll_ms),
        )),
        config: Arc::new(SessionConfig::from_settings(&settings, &endpoints)),
        health: settings.health.clone(),
        user_id: settings.user_id.clone(),
        tick_interval: Duration::from_millis(settings.tick_interval_ms),
    };

    info!("Following room {}", args.room_id);
    let mut controller = SessionController::mount(args.room_id, deps);
    let mut updates = controller.subscribe();

    let loaded = updates
        .wait_for(|s| s.is_loaded() || s.error.is_some())
        .await
        .map(|s| s.clone());
    let state = match loaded {
        Ok(state) => state,
        Err(_) => {
            controller.teardown().await;
            bail!("session view closed before loading");
        }
    };
    if state.error.is_some() {
        controller.teardown().await;
        bail!("{}", commands::describe(&state));
    }

    if args.start {
        if let Err(err) = commands::start_prayer(&controller).await {
            warn!("Could not start room: {}", err);
        }
    }
    for friend_id in args.invites {
        match commands::invite_friend(&controller, friend_id.clone()).await {
            Ok(()) => info!("Invited {}", friend_id),
            Err(err) => warn!("Could not invite {}: {}", friend_id, err),
        }
    }

    let mut last_line = String::new();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                let line = commands::describe(&state);
                if line != last_line {
                    info!("{}", line);
                    last_line = line;
                }
                if state.lifecycle == LifecycleState::Ended {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    controller.teardown().await;
    Ok(())
}
