//! Demo server: serves the models described in `CONFIG_PATH` from PostgreSQL.
//!
//! Authentication is out of scope for the library; this demo trusts `X-User` / `X-Roles`
//! request headers so the permission gate can be exercised with curl.
//!
//! Run: `cargo run --example server`

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    Router,
};
use model_rest::{
    common_routes_with_ready, load_from_dir, resolve, resource_routes, AppState, AuthUser, PgStore,
    Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn dev_user(mut request: Request, next: Next) -> Response {
    let (user_id, roles_header) = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        (header("x-user"), header("x-roles"))
    };
    if let Some(id) = user_id {
        let roles = roles_header.unwrap_or_default();
        let user = AuthUser::new(id).with_roles(roles.split(',').map(str::trim).filter(|r| !r.is_empty()));
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("model_rest=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let config = load_from_dir(&settings.config_path).await?;
    let model = resolve(&config)?;
    tracing::info!(entities = model.entities.len(), "model resolved");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    let bind_addr = settings.bind_addr.clone();
    let api_prefix = settings.api_prefix.clone();
    let state = AppState::new(Arc::new(PgStore::new(pool)), model, settings);

    let app = Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest(&api_prefix, resource_routes(state))
        .layer(middleware::from_fn(dev_user));

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
