//! Core data models shared by the three stores.
//!
//! Relational rows and result sets live in `table`, object-store entities in
//! `bucket`, `object` and `multipart`. Documents are plain `bson::Document`s
//! and need no wrapper.

pub mod bucket;
pub mod multipart;
pub mod object;
pub mod table;
