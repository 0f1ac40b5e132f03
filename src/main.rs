use std::sync::Arc;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use postern::auth::CredentialVerifier;
use postern::rules::registry::SnapshotRegistry;
use postern::settings::Settings;
use postern::store::SnapshotStore;
use postern::watch::ChangeWatcher;
use postern::web;

#[derive(Parser, Debug)]
#[command(
    name = "postern",
    version,
    about = "Relay-authorization decision engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "postern.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::info!(config = %cli.config, "Loaded configuration");

    // Bootstrap: live store, else fallback cache, else refuse to start.
    let store = SnapshotStore::connect(&settings).await?;
    let initial = store.bootstrap().await?;
    let registry = Arc::new(SnapshotRegistry::new(initial));

    // Reloads run off the decision path from here on.
    let _watcher = ChangeWatcher::spawn(&settings.database, store, Arc::clone(&registry));

    let state = web::AppState {
        registry,
        verifier: Arc::new(CredentialVerifier::new(
            settings.relay.jwt_secret.as_bytes().to_vec(),
        )),
    };

    web::serve(&settings, state).await?;
    Ok(())
}
