use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wagerbook_execution::WriteMode;
use wagerbook_server::{Api, Server, ServerConfig};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "wagerbook-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("wagerbook-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite ledger database (in-memory when omitted).
    #[arg(long)]
    ledger_path: Option<PathBuf>,

    /// How balance updates are written: overwrite or increment.
    #[arg(long, default_value = "overwrite")]
    write_mode: String,

    /// Plain admin secret (falls back to ADMIN_SECRET).
    #[arg(long, env = "ADMIN_SECRET", hide_env_values = true)]
    admin_secret: Option<String>,

    /// Argon2 PHC hash of the admin secret; takes precedence over the plain secret.
    #[arg(long, env = "ADMIN_SECRET_HASH", hide_env_values = true)]
    admin_secret_hash: Option<String>,

    /// Admin login attempts allowed per minute per IP (0 disables limit).
    #[arg(long)]
    admin_login_rate_limit_per_minute: Option<u64>,

    /// Burst of admin login attempts allowed per IP (0 disables limit).
    #[arg(long)]
    admin_login_rate_limit_burst: Option<u32>,

    /// HTTP requests allowed per second per IP (0 disables limit).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,

    /// Burst of HTTP requests allowed per IP (0 disables limit).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Maximum HTTP request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,

    /// Lifetime of player and admin session tokens, in seconds.
    #[arg(long)]
    session_ttl_seconds: Option<u64>,

    /// Live player sessions kept before the oldest is evicted.
    #[arg(long)]
    max_player_sessions: Option<usize>,

    /// Live admin sessions kept before the oldest is evicted.
    #[arg(long)]
    max_admin_sessions: Option<usize>,
}

/// Maps an optional arg value: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    let write_mode: WriteMode = args
        .write_mode
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid write mode {:?}: {err}", args.write_mode))?;
    let admin_secret = args
        .admin_secret
        .as_ref()
        .map(|secret| secret.trim().to_string())
        .filter(|secret| !secret.is_empty());
    let admin_secret_hash = args
        .admin_secret_hash
        .as_ref()
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty());

    Ok(ServerConfig {
        ledger_path: args.ledger_path.clone(),
        write_mode,
        admin_secret,
        admin_secret_hash,
        admin_login_rate_limit_per_minute: map_optional_limit(
            args.admin_login_rate_limit_per_minute,
            defaults.admin_login_rate_limit_per_minute,
        ),
        admin_login_rate_limit_burst: map_optional_limit(
            args.admin_login_rate_limit_burst,
            defaults.admin_login_rate_limit_burst,
        ),
        http_rate_limit_per_second: map_optional_limit(
            args.http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
        session_ttl: args
            .session_ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_ttl),
        max_player_sessions: args
            .max_player_sessions
            .unwrap_or(defaults.max_player_sessions),
        max_admin_sessions: args
            .max_admin_sessions
            .unwrap_or(defaults.max_admin_sessions),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config = build_config(&args)?;
    info!(
        write_mode = ?config.write_mode,
        persistent = config.ledger_path.is_some(),
        "starting wagerbook server"
    );
    let server = Server::new(config)?;
    let app = Api::new(server).router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
