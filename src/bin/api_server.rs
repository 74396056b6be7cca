// src/bin/api_server.rs

use axum::http::HeaderValue;
use certificate_portal::app::{CertificateService, InstitutionService, Reconciler};
use certificate_portal::infra::{AppConfig, Ledger, PinataClient, Pinning, SolanaLedger};
use certificate_portal::storage::{CertificateRepository, InstitutionRepository, PgRepository};
use certificate_portal::transport;
use certificate_portal::TokenIssuer;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        rpc_url = %config.solana.rpc_url,
        program_id = %config.solana.program_id,
        development = config.development,
        admins = config.admin_wallets.len(),
        "configuration loaded"
    );

    // --- Storage ---
    let repo = Arc::new(PgRepository::connect(&config.database).await?);
    tracing::info!("database connected, schema ready");

    // --- Ledger ---
    let ledger = Arc::new(SolanaLedger::connect(&config.solana, config.retry)?);
    match ledger.registry_state().await {
        Ok(Some(registry)) => tracing::info!(
            registry = %ledger.registry_address(),
            next_token_id = registry.next_token_id,
            "certificate registry found"
        ),
        Ok(None) => match ledger.initialize_registry().await {
            Ok(signature) => tracing::info!(?signature, "certificate registry initialized"),
            Err(e) => tracing::warn!(error = %e, "certificate registry missing and could not be created"),
        },
        Err(e) => tracing::warn!(error = %e, "could not read certificate registry at startup"),
    }

    // --- Pinning ---
    let pinning = Arc::new(PinataClient::new(config.pinata.clone()));

    // --- Services ---
    let institutions_repo: Arc<dyn InstitutionRepository> = repo.clone();
    let certificates_repo: Arc<dyn CertificateRepository> = repo.clone();
    let ledger_dyn: Arc<dyn Ledger> = ledger.clone();
    let pinning_dyn: Arc<dyn Pinning> = pinning.clone();

    let institutions = Arc::new(InstitutionService::new(
        institutions_repo.clone(),
        TokenIssuer::new(&config.jwt_secret),
        config.admin_wallets.clone(),
    ));
    let certificates = Arc::new(CertificateService::new(
        certificates_repo.clone(),
        ledger_dyn.clone(),
        pinning_dyn.clone(),
        config.retry,
    ));

    // --- Reconciliation ---
    let reconciler = Arc::new(Reconciler::new(
        institutions_repo,
        certificates_repo,
        ledger_dyn,
        pinning_dyn,
        config.reservation_grace,
    ));
    match reconciler.run_once().await {
        Ok(report) => tracing::info!(?report, "startup reconciliation finished"),
        Err(e) => tracing::error!(error = %e, "startup reconciliation failed"),
    }
    if let Some(every) = config.reconcile_interval {
        reconciler.clone().start_background_task(every);
        tracing::info!(interval_secs = every.as_secs(), "periodic reconciliation started");
    }

    let app_state = transport::http::AppState {
        certificates,
        institutions,
        development: config.development,
        max_upload_bytes: config.max_upload_bytes,
    };

    // --- API Server ---
    let cors = CorsLayer::new()
        .allow_origin(config.frontend_url.parse::<HeaderValue>()?)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = transport::http::create_router(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
        .layer(cors);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "API server listening; Swagger UI at /swagger-ui");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    reconciler.shutdown();
    tracing::info!("graceful shutdown complete");
    Ok(())
}
