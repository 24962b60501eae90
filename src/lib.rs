//! Data access facade over a relational store, a document store with an
//! atomic sequence counter, and an S3-compatible object store.
//!
//! The three stores live in [`services`] and can be used directly; the
//! [`routes`] module exposes them over HTTP.

pub mod config;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
