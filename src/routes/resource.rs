//! Resource routes. Handlers resolve the resource from the `path_segment` parameter; every
//! route sits behind the permission gate.

use crate::auth::auth_gate;
use crate::handlers::resource::{create, delete as delete_handler, list, read, update};
use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

pub fn resource_routes(state: AppState) -> Router {
    let body_limit = state.settings.body_limit;
    Router::new()
        .route("/:path_segment", get(list).post(create))
        .route(
            "/:path_segment/:id",
            get(read).put(update).delete(delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_gate))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
        .with_state(state)
}
