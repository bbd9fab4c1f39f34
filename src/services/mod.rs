//! Service layer: the storage gateway abstraction and the image service
//! that implements catalog, ingestion, and metadata operations on top of it.

pub mod gateway;
pub mod image_service;
