//! Model REST: an auto-generated REST layer over configured models with permission-gated,
//! transactional nested writes.

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod filter;
pub mod form;
pub mod handlers;
pub mod mimer;
pub mod paginator;
pub mod processor;
pub mod resource;
pub mod response;
pub mod routes;
pub mod serializer;
pub mod sql;
pub mod state;
pub mod store;

pub use auth::{AuthUser, AuthWrapper, PermissionValidators};
pub use config::{load_from_dir, resolve, FullConfig, ResolvedEntity, ResolvedModel, Settings};
pub use error::{AppError, ConfigError};
pub use extractors::{CurrentUser, RestRequest};
pub use resource::{DefaultCore, ModelResource, Resource, ResourceCore, ResourceRegistry, RestContext};
pub use response::{rest_error, rest_ok, HeadersResult, Rc};
pub use routes::{common_routes, common_routes_with_ready, resource_routes};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Store, Transaction};
