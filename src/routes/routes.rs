//! Defines routes for the image host.
//!
//! ## Structure
//! - `GET  /` — list qualifying images (supports ?added= to promote a fresh upload)
//! - `POST /add` — ingest an image from a remote url
//! - `GET  /{name}/{extension}` — fetch one image with metadata
//! - `PUT  /{name}/{extension}` — replace description and tags
//!
//! Images are addressed by name and extension separately; handlers
//! reassemble the object key from the two segments.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{add_image, get_image, list_images, update_image},
    },
    services::image_service::ImageService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all image routes.
///
/// The router carries shared state (`ImageService`) to all handlers.
pub fn routes() -> Router<ImageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // gallery routes
        .route("/", get(list_images))
        .route("/add", post(add_image))
        .route("/{name}/{extension}", get(get_image).put(update_image))
}
