//! Kafka SASL authentication check
//!
//! Connects to a broker, runs the SASL exchange, and reports the principal
//! and session deadline. Optionally re-authenticates once, or keeps the
//! connection open and re-authenticates whenever the session is due.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_sasl_core::broker::BrokerConnection;
use kafka_sasl_core::config::{ClientConfig, LoggingConfig};
use kafka_sasl_core::session::{SystemClock, Time};

/// Check SASL authentication against a Kafka broker.
#[derive(Parser)]
#[command(name = "kafka-sasl-check")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Override broker address.
    #[arg(long)]
    broker: Option<String>,

    /// Re-authenticate once after the initial exchange.
    #[arg(long)]
    reauthenticate: bool,

    /// Keep the connection open and re-authenticate whenever the session is due.
    #[arg(long, conflicts_with = "reauthenticate")]
    watch: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config))?;

    if let Some(broker) = args.broker.clone() {
        config.broker.address = broker;
        config.validate()?;
    }

    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.broker.address,
        mechanism = config.sasl.mechanism.mechanism_name(),
        "starting SASL check"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run(config, &args).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run(config: ClientConfig, args: &Args) -> anyhow::Result<()> {
    let mut conn = BrokerConnection::connect(&config.broker, &config.sasl).await?;
    conn.authenticate().await?;
    report(&conn);

    if args.reauthenticate {
        conn.reauthenticate().await?;
        report(&conn);
    }

    if args.watch {
        watch(&mut conn).await?;
    }
    Ok(())
}

fn report(conn: &BrokerConnection) {
    let auth = conn.authenticator();
    println!("principal: {}", auth.principal());
    match auth.session_lifetime_ms() {
        Some(lifetime) => println!("session lifetime: {lifetime}ms"),
        None => println!("session lifetime: none"),
    }
    if let Some(deadline) = auth.client_session_reauthentication_time_ms() {
        println!("re-authenticate at: {deadline}");
    }
    if let Some(elapsed) = auth.reauthentication_elapsed_ms() {
        println!("re-authentication took: {elapsed}ms");
    }
}

async fn watch(conn: &mut BrokerConnection) -> anyhow::Result<()> {
    let clock = SystemClock;
    loop {
        let Some(deadline) = conn.authenticator().client_session_reauthentication_time_ms() else {
            warn!("broker granted no session lifetime, nothing to re-authenticate");
            shutdown_signal().await;
            return Ok(());
        };
        let wait_ms = (deadline - clock.milliseconds()).max(0) as u64;
        info!(wait_ms, "waiting for session re-authentication");

        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received");
                return Ok(());
            }
            () = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
        }

        if conn.needs_reauthentication(clock.milliseconds()) {
            conn.reauthenticate().await?;
            report(conn);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
