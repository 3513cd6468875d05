use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rotator::cli::{self, Commands, SecretCommands};
use rotator::config::{self, Config};
use rotator::database::postgres::PgCredentialDatabase;
use rotator::models::credential::CredentialRecord;
use rotator::models::request::RotationRequest;
use rotator::models::stage::StageLabel;
use rotator::password::PasswordGenerator;
use rotator::rotation::RotationHandler;
use rotator::vault::client::SecretStoreClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Commands::Rotate {
            secret_id,
            token,
            step,
        } => {
            let handler = build_handler(&cfg).await?;
            handler
                .handle(&RotationRequest::new(secret_id, token, step))
                .await
                .map_err(Into::into)
        }
        Commands::RotateAll { secret_id, token } => {
            let token = token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let handler = build_handler(&cfg).await?;
            handler.rotate(&secret_id, &token).await?;
            println!("Rotated {} to version {}", secret_id, token);
            Ok(())
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(cfg.port);
            run_server(&cfg, port).await
        }
        Commands::Secret { command } => handle_secret_command(&cfg, command).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector endpoint is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "rotator"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("ROTATOR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rotator=info,tower_http=info".into()),
        ))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn build_handler(cfg: &Config) -> anyhow::Result<RotationHandler> {
    let store = cfg.secret_store().await?;
    let database = Arc::new(PgCredentialDatabase::new(cfg.database_options()));
    Ok(RotationHandler::new(
        store,
        database,
        PasswordGenerator::default(),
        cfg.rotation_settings(),
    ))
}

async fn run_server(cfg: &Config, port: u16) -> anyhow::Result<()> {
    let handler = Arc::new(build_handler(cfg).await?);
    let app = rotator::api::router(handler);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("rotator listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_secret_command(cfg: &Config, cmd: SecretCommands) -> anyhow::Result<()> {
    let client = SecretStoreClient::new(cfg.secret_store().await?);
    match cmd {
        SecretCommands::Put {
            secret_id,
            file,
            token,
        } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let record = CredentialRecord::from_json(&raw)
                .map_err(|reason| anyhow::anyhow!("{}: {}", file.display(), reason))?;
            let token = token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            client
                .write_version(&secret_id, &token, &record, &[StageLabel::Current])
                .await?;
            println!("Stored version {} of {} as CURRENT", token, secret_id);
        }
        SecretCommands::Stages { secret_id } => {
            let description = client.describe(&secret_id).await?;
            if description.versions.is_empty() {
                println!("No versions found for {}", secret_id);
            }
            for (version_id, stages) in &description.versions {
                let labels: Vec<&str> = stages.iter().map(StageLabel::as_str).collect();
                println!("{}\t{}", version_id, labels.join(","));
            }
        }
    }
    Ok(())
}
