use clap::Parser;
use miette::Result;
use std::sync::Arc;
use std::time::Duration;
use tether::dispatcher::Dispatcher;
use tether::jobs::{self, JobContext};
use tether::transport::{HttpPushTransport, LoggingTransport, NotificationTransport};
use tether::{admin_graphql, org_sync, settings, storage, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Device pairing, command dispatch and presence for multi-tenant MDM"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// JSON file with organizations and members to create or update on startup
    #[arg(long)]
    organizations: Option<String>,

    /// Skip applying database migrations
    #[arg(long)]
    no_migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(config = %cli.config, "Loaded configuration");

    // init storage (database)
    let db = storage::init(&settings.database).await?;
    if !cli.no_migrate {
        storage::migrate(&db).await?;
    }

    if let Some(path) = &cli.organizations {
        org_sync::sync_organizations_from_file(&db, path).await?;
    }

    let transport: Arc<dyn NotificationTransport> = match &settings.push.endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, "Using HTTP push gateway");
            Arc::new(HttpPushTransport::new(
                endpoint.clone(),
                settings.push.api_key.clone(),
                Duration::from_millis(settings.dispatch.transport_timeout_ms),
            )?)
        }
        None => {
            tracing::warn!("No push endpoint configured; command deliveries are only logged");
            Arc::new(LoggingTransport)
        }
    };

    let dispatcher = Dispatcher::new(db.clone(), transport, settings.dispatch.clone());
    let job_ctx = JobContext {
        db: db.clone(),
        dispatcher,
        settings: Arc::new(settings.clone()),
    };

    // background jobs run for the lifetime of the process
    let _scheduler = jobs::init_scheduler(job_ctx.clone()).await?;

    let admin_schema = admin_graphql::build_schema(job_ctx);

    // start web server
    web::serve(settings, db, admin_schema).await?;
    Ok(())
}
