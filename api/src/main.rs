use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod executor;
mod extract;
mod llm;
mod middleware;
mod pipeline;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tally API",
        version = "0.1.0",
        description = "Ask natural-language questions about analytics event data. Stateless: send the conversation with every request."
    ),
    paths(routes::health::health_check, routes::ask::ask),
    components(schemas(
        routes::health::HealthResponse,
        tally_core::ask::AskRequest,
        tally_core::ask::AskResponse,
        tally_core::conversation::Turn,
        tally_core::conversation::Role,
        tally_core::error::ApiError,
    ))
)]
struct ApiDoc;

fn app(app_state: state::AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::ask::router().layer(middleware::rate_limit::ask_layer()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!(error = %err, "{context}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let settings = config::Settings::from_env()
        .unwrap_or_else(|err| fail("Invalid configuration", err));

    // Lazy so the service starts (and reports degraded) while the store is down
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect_lazy(&settings.database_url)
        .unwrap_or_else(|err| fail("Invalid DATABASE_URL", err));

    let generator = llm::GeminiClient::new(&settings.llm)
        .unwrap_or_else(|err| fail("Failed to build LLM client", err));

    let pipeline = pipeline::Pipeline::new(
        Arc::new(generator),
        Arc::new(executor::PgExecutor::new(pool)),
        settings.ruleset.clone(),
        settings.pipeline.clone(),
    );

    tracing::info!(
        model = %settings.pipeline.model,
        events_table = %settings.ruleset.events_table,
        timezone = settings.ruleset.timezone.name(),
        query_guard = settings.pipeline.query_guard,
        history_char_budget = ?settings.pipeline.history_char_budget,
        "Pipeline configured"
    );

    let app = app(state::AppState {
        pipeline: Arc::new(pipeline),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("Tally API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|err| fail("Failed to bind listener", err));

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        fail("Server error", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_ask_and_health() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/ask"));
        assert!(doc.paths.paths.contains_key("/health"));
        let schemas = doc.components.expect("components present").schemas;
        assert!(schemas.contains_key("AskRequest"));
        assert!(schemas.contains_key("ApiError"));
    }
}
