//! Core data model for the image host.
//!
//! An `Image` is the per-request projection of one stored blob interpreted
//! as a candidate image. It is built fresh from gateway responses on every
//! read and serializes naturally as JSON via `serde`.

pub mod image;
