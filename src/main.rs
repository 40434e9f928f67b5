// src/main.rs
// Augury - prediction-market group chat server

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use augury::config::Config;
use augury::events::EventEngine;
use augury::identity::{HttpIdentityVerifier, IdentityVerifier, StaticIdentityVerifier};
use augury::locks::ChatLocks;
use augury::profile::ProfileCache;
use augury::push::{HttpPushNotifier, NoopNotifier, PushNotifier};
use augury::server::{self, AppContext};
use augury::store::MySqlStore;

#[derive(Parser, Debug)]
#[command(name = "augury", about = "Prediction-market group chat server")]
struct Args {
    /// Listener address, overrides LISTEN_ADDR
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let level = match std::env::var("AUGURY_LOG").as_deref() {
        Ok("error") => Level::ERROR,
        Ok("warn") => Level::WARN,
        Ok("debug") => Level::DEBUG,
        Ok("trace") => Level::TRACE,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let args = Args::parse();
    let config = Config::load()?;
    let listen_addr = args.listen.unwrap_or_else(|| config.listen_addr.clone());

    let pool = MySqlPoolOptions::new()
        .max_connections(8)
        .connect(&config.db.url())
        .await?;
    info!(host = %config.db.host, db = %config.db.name, "database connected");
    let store = Arc::new(MySqlStore::new(pool));

    let identity: Arc<dyn IdentityVerifier> = match (&config.identity.base_url, &config.identity.api_key) {
        (Some(base_url), Some(api_key)) => {
            Arc::new(HttpIdentityVerifier::new(base_url.clone(), api_key.clone()))
        }
        _ => {
            warn!("identity provider not configured; every token will be rejected");
            Arc::new(StaticIdentityVerifier::new())
        }
    };

    let push: Arc<dyn PushNotifier> = match (&config.push.base_url, &config.push.server_key) {
        (Some(base_url), Some(server_key)) => {
            Arc::new(HttpPushNotifier::new(base_url.clone(), server_key.clone()))
        }
        _ => Arc::new(NoopNotifier),
    };

    let (events, worker) = EventEngine::new();
    tokio::spawn(worker.run());

    let ctx = Arc::new(AppContext {
        store,
        identity,
        push,
        events,
        locks: ChatLocks::new(),
        profiles: ProfileCache::new(),
        join_secret: config.join_secret.clone(),
    });

    let listener = TcpListener::bind(&listen_addr).await?;
    server::serve(listener, ctx).await?;
    Ok(())
}
