//! txdb-probe - startup check for a database configuration.
//!
//! Connects with the given settings, pings the server, reads the session
//! settings inside a read-only transaction and closes the pool again.

use clap::Parser;
use txdb::config::DbConfig;
use txdb::db::{Db, TxOptions};
use txdb::error::DbResult;
use txdb::mapper::Mapper;
use txdb::query::{PSQL, Statement};
use txdb::{IsolationLevel, record};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "txdb-probe", version, about = "Check a PostgreSQL pool configuration")]
struct Cli {
    #[command(flatten)]
    db: DbConfig,

    /// Isolation level of the probe transaction
    #[arg(long, default_value = "read committed")]
    isolation: IsolationLevel,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs in JSON format
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

record! {
    #[derive(Debug)]
    struct SessionSettings in "session" {
        application_name: String => "application_name" [read_only],
        search_path: String => "search_path" [read_only],
        isolation: String => "transaction_isolation" [read_only],
        read_only: String => "transaction_read_only" [read_only],
    }
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn settings_statement() -> DbResult<Statement> {
    PSQL.select([
        "current_setting('application_name')",
        "current_setting('search_path')",
        "current_setting('transaction_isolation')",
        "current_setting('transaction_read_only')",
    ])
    .to_statement()
}

async fn probe(db: &Db, isolation: IsolationLevel) -> DbResult<()> {
    db.ping().await?;
    info!("Database answered ping");

    let options = TxOptions::read_only().isolation(isolation);
    let settings = db
        .transaction(options, |tx| {
            Box::pin(async move {
                let statement = settings_statement()?;
                Mapper::<SessionSettings>::new().fetch(tx, &statement).await
            })
        })
        .await?;

    for s in &settings {
        info!(
            application_name = %s.application_name,
            search_path = %s.search_path,
            isolation = %s.isolation,
            read_only = %s.read_only,
            "Session settings"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        url = %cli.db.masked_url(),
        "Starting txdb-probe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Db::connect(&cli.db)?;
    let result = probe(&db, cli.isolation).await;
    db.close().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Probe failed");
        return Err(e.into());
    }

    info!("Probe complete");
    Ok(())
}
