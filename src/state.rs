//! Shared handler state: one handle per configured backend.

use crate::{
    errors::AppError,
    services::{
        document_store::DocumentStore, object_store::ObjectStore, relational_store::RelationalStore,
    },
};

/// Backends without credentials stay `None`; their routes answer 503.
#[derive(Clone, Default)]
pub struct AppState {
    pub relational: Option<RelationalStore>,
    pub documents: Option<DocumentStore>,
    pub objects: Option<ObjectStore>,
}

impl AppState {
    pub fn relational(&self) -> Result<&RelationalStore, AppError> {
        self.relational
            .as_ref()
            .ok_or_else(|| AppError::unavailable("relational store is not configured"))
    }

    pub fn documents(&self) -> Result<&DocumentStore, AppError> {
        self.documents
            .as_ref()
            .ok_or_else(|| AppError::unavailable("document store is not configured"))
    }

    pub fn objects(&self) -> Result<&ObjectStore, AppError> {
        self.objects
            .as_ref()
            .ok_or_else(|| AppError::unavailable("object store is not configured"))
    }

    /// Close every pool, waiting for in-flight work.
    pub async fn close(&self) {
        if let Some(relational) = &self.relational {
            relational.close().await;
        }
        if let Some(documents) = &self.documents {
            documents.close().await;
        }
    }
}
