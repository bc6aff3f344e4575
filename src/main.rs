mod collab;
mod config;
mod db;
mod protocol;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use collab::push::WebhookNotifier;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let relay_config = config::RelayConfig::from_env();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url, relay_config.db_max_connections)
        .await
        .expect("database init failed");
    let collaborators = Arc::new(collab::postgres::PgCollaborators::new(pool));

    // Push is optional: missing config disables it, nothing else changes.
    let push: Option<Arc<dyn collab::PushNotifier>> = match WebhookNotifier::from_env() {
        Ok(notifier) => Some(Arc::new(notifier)),
        Err(e) => {
            tracing::warn!(error = %e, "push notifier not configured — notifications disabled");
            None
        }
    };

    let state = state::AppState::new(
        collaborators.clone(),
        collaborators.clone(),
        collaborators,
        push,
        relay_config,
    );

    // Spawn background liveness sweep.
    let _liveness = services::liveness::spawn_liveness_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "rideline listening");
    axum::serve(listener, app).await.expect("server failed");
}
