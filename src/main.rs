use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use gatehouse::policy::engine::Evaluator;
use gatehouse::policy::loader;
use gatehouse::{settings, storage, web};

#[derive(Parser, Debug)]
#[command(
    name = "gatehouse",
    version,
    about = "Access-policy evaluator for the Unlock document database"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // compile the rule table; configuration defects abort startup here
    let state = loader::load_policies(&settings.policies.dir)?;

    // init the document store
    let db = storage::init(&settings.database).await.into_diagnostic()?;
    let store = Arc::new(storage::DbStore::new(db));

    let evaluator = Arc::new(Evaluator::new(
        state,
        store,
        Duration::from_millis(settings.lookups.timeout_ms),
    ));

    web::serve(&settings, evaluator).await?;
    Ok(())
}
