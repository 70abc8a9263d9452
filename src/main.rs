use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broome::accounts::Credentials;
use broome::config::{self, Config};
use broome::license::renewal::SessionResult;
use broome::metrics::PrometheusRecorder;
use broome::notification::slack::SlackNotifier;
use broome::notification::webhook::WebhookNotifier;
use broome::notification::{EventNotifier, MemoryNotifier, NotifierHub};
use broome::payment::stripe::StripeClient;
use broome::store::memory::MemoryStore;
use broome::store::postgres::PgStore;
use broome::store::DeveloperStore;
use broome::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "broome"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "broome=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Developer { command }) => handle_developer_command(cfg, command).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn DeveloperStore>> {
    if cfg.uses_memory_store() {
        tracing::warn!("using in-memory developer store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;
    tracing::info!("Running migrations...");
    db.migrate().await?;
    Ok(Arc::new(db))
}

/// Every configured event sink plus the metrics recorder.
fn build_notifier(cfg: &Config, metrics: Arc<PrometheusRecorder>) -> anyhow::Result<NotifierHub> {
    let mut hub = NotifierHub::new().with(metrics);

    if !cfg.webhook_urls.is_empty() {
        let webhook = WebhookNotifier::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone())?;
        tracing::info!(count = webhook.urls().len(), "license event webhooks enabled");
        hub = hub.with(Arc::new(webhook));
    }

    // Sign-up announcements only go out from production.
    if cfg.is_production() && cfg.slack_webhook_url.is_some() {
        hub = hub.with(Arc::new(SlackNotifier::new(
            cfg.slack_webhook_url.clone(),
            cfg.internal_email_domain.clone(),
        )));
    }

    Ok(hub)
}

async fn build_state(cfg: Config, extra_sink: Option<Arc<dyn EventNotifier>>) -> anyhow::Result<Arc<AppState>> {
    let store = open_store(&cfg).await?;
    let gateway = Arc::new(StripeClient::new(
        &cfg.stripe_api_base,
        &cfg.stripe_secret_key,
        cfg.billing.charge_timeout,
    )?);
    let metrics = Arc::new(PrometheusRecorder::new()?);

    let mut hub = build_notifier(&cfg, metrics.clone())?;
    if let Some(sink) = extra_sink {
        hub = hub.with(sink);
    }

    Ok(Arc::new(AppState::new(cfg, store, gateway, Arc::new(hub), metrics)))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let state = build_state(cfg, None).await?;

    let app = api::router(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        environment = ?state.config.environment,
        renewal_amount_cents = state.config.billing.renewal_amount_cents,
        "broome listening on {}",
        addr
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: responses carry bearer tokens, so nothing may be cached or sniffed.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");
    resp
}

async fn handle_developer_command(cfg: Config, cmd: cli::DeveloperCommands) -> anyhow::Result<()> {
    let events = MemoryNotifier::new();
    let state = build_state(cfg, Some(Arc::new(events.clone()))).await?;

    match cmd {
        cli::DeveloperCommands::Create { name, email, password } => {
            let dev = state
                .accounts
                .create_developer(Credentials { name, email, password })
                .await?;
            println!(
                "Developer created:\n  ID:         {}\n  Email:      {}\n  Token:      {}\n  Expiration: {}",
                dev.id,
                dev.email,
                dev.token,
                dev.expiration.map(|e| e.to_rfc3339()).unwrap_or_default()
            );
        }
        cli::DeveloperCommands::List => {
            let developers = state.accounts.list().await?;
            if developers.is_empty() {
                println!("No developers found.");
            } else {
                println!("{:<38} {:<32} {:<27} {:<6}", "ID", "EMAIL", "EXPIRATION", "PAID");
                for d in developers {
                    println!(
                        "{:<38} {:<32} {:<27} {:<6}",
                        d.id,
                        d.email,
                        d.expiration.map(|e| e.to_rfc3339()).unwrap_or_else(|| "-".into()),
                        d.is_paid
                    );
                }
            }
        }
        cli::DeveloperCommands::Show { token } => {
            let dev = state.accounts.by_token(&token).await?;
            println!("{}", serde_json::to_string_pretty(&dev.public())?);
        }
        cli::DeveloperCommands::Check { id } => {
            let result = state.sessions.check_session(&id).await?;
            match &result {
                SessionResult::RenewalFailed { reason, .. } => {
                    println!("Session: failed ({})", reason.message());
                }
                other => println!("Session: {}", other.status()),
            }
            println!("{}", serde_json::to_string_pretty(&result.developer().session_view())?);
            for event in events.events() {
                println!("  event: {}", event.kind.as_str());
            }
        }
    }
    Ok(())
}
