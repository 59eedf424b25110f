//! enrober-api — REST API for Enrober.
//!
//! Routes are nested under the configured `server.api_prefix`
//! (`/beeswax/deploy/api/v1` by default). `{env}` is `{org}{sep}{env}`
//! with the profile's separator.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/environments` | List environments |
//! | POST | `/environments` | Create an environment |
//! | GET | `/environments/{env}` | Get an environment |
//! | PATCH | `/environments/{env}` | Update hostnames, regenerate keys |
//! | DELETE | `/environments/{env}` | Delete an environment and its contents |
//! | GET | `/environments/{env}/deployments` | List deployments |
//! | POST | `/environments/{env}/deployments` | Create a deployment |
//! | GET | `/environments/{env}/deployments/{name}` | Get a deployment |
//! | PATCH | `/environments/{env}/deployments/{name}` | Update a deployment |
//! | DELETE | `/environments/{env}/deployments/{name}` | Cascade-delete a deployment |
//! | GET | `/environments/{env}/deployments/{name}/logs` | Pod logs, `?tail=N` |

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use enrober_core::Enrober;

pub use error::{ApiError, status_for};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub enrober: Arc<Enrober>,
}

/// Build the complete API router.
pub fn build_router(enrober: Arc<Enrober>) -> Router {
    let prefix = enrober.config().server.api_prefix.trim_matches('/').to_string();
    let api_state = ApiState { enrober };

    let api_routes = Router::new()
        .route(
            "/environments",
            get(handlers::list_environments).post(handlers::create_environment),
        )
        .route(
            "/environments/{env}",
            get(handlers::get_environment)
                .patch(handlers::patch_environment)
                .delete(handlers::delete_environment),
        )
        .route(
            "/environments/{env}/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route(
            "/environments/{env}/deployments/{name}",
            get(handlers::get_deployment)
                .patch(handlers::patch_deployment)
                .delete(handlers::delete_deployment),
        )
        .route(
            "/environments/{env}/deployments/{name}/logs",
            get(handlers::deployment_logs),
        )
        .with_state(api_state);

    if prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(&format!("/{prefix}"), api_routes)
    }
}
