//! HTTP handlers for gallery listing, metadata edits, and URL ingestion.
//! Thin glue: request shapes in, JSON out, everything else delegated to
//! `ImageService`.

use crate::{
    errors::AppError,
    models::image::{Image, TagsInput},
    services::image_service::ImageService,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

/// Query params accepted by the listing route.
#[derive(Debug, Deserialize)]
pub struct ListImagesQuery {
    /// Key of a just-uploaded image to float to the top.
    pub added: Option<String>,
}

/// Request body for `PUT /{name}/{extension}`.
#[derive(Debug, Deserialize)]
pub struct UpdateImageReq {
    pub description: Option<String>,
    /// Raw delimited string or an already-split list; both accepted.
    pub tags: Option<TagsInput>,
}

/// Request body for `POST /add`.
#[derive(Debug, Deserialize)]
pub struct AddImageReq {
    pub url: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddImageResp {
    pub key: String,
}

/// GET `/` — qualifying images, newest first, `?added=` promoted to the top.
pub async fn list_images(
    State(service): State<ImageService>,
    Query(query): Query<ListImagesQuery>,
) -> Result<Json<Vec<Image>>, AppError> {
    let images = service.list_images(query.added.as_deref()).await?;
    Ok(Json(images))
}

/// GET `/{name}/{extension}` — one image with its hydrated metadata.
pub async fn get_image(
    State(service): State<ImageService>,
    Path((name, extension)): Path<(String, String)>,
) -> Result<Json<Image>, AppError> {
    let key = Image::object_key(&name, &extension);

    match service.find(&key).await {
        Some(image) => Ok(Json(image)),
        None => Err(AppError::not_found(format!("image `{}` not found", key))),
    }
}

/// PUT `/{name}/{extension}` — replace description and tags.
pub async fn update_image(
    State(service): State<ImageService>,
    Path((name, extension)): Path<(String, String)>,
    Json(payload): Json<UpdateImageReq>,
) -> Result<impl IntoResponse, AppError> {
    let key = Image::object_key(&name, &extension);
    let description = payload.description.unwrap_or_default();
    let tags = payload.tags.unwrap_or_else(|| TagsInput::List(Vec::new()));

    service.update_metadata(&key, &description, tags).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/add` — ingest an image from a remote url, returning the new key
/// so the client can re-list with `?added=<key>`.
pub async fn add_image(
    State(service): State<ImageService>,
    Json(payload): Json<AddImageReq>,
) -> Result<impl IntoResponse, AppError> {
    let key = service
        .upload_from_url(&payload.url, payload.name.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(AddImageResp { key })))
}
