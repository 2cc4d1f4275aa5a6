//! # Space Directory
//!
//! Mints space codes and decides whether a code names a joinable space.

use std::sync::Arc;

use mk_core::{fields, AppError, DocumentStore, FieldValue, Result, SpaceCode, WriteFields};
use tracing::{debug, info};

use crate::{posts_collection, spaces_collection};

#[derive(Clone)]
pub struct SpaceDirectory {
    store: Arc<dyn DocumentStore>,
}

impl SpaceDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Registers `code` as an existing space. Calling it again for the
    /// same code is a no-op.
    pub async fn create_space(&self, code: &SpaceCode) -> Result<()> {
        let marker = spaces_collection().doc(code.as_str());
        if self
            .store
            .get_document(&marker)
            .await
            .map_err(AppError::Store)?
            .is_some()
        {
            debug!(space = %code, "space already registered");
            return Ok(());
        }

        let mut doc = WriteFields::new();
        doc.insert(fields::CREATED_AT.to_string(), FieldValue::ServerTimestamp);
        self.store
            .set_document(&marker, doc)
            .await
            .map_err(AppError::Store)?;

        info!(space = %code, "space created");
        Ok(())
    }

    /// Generates a fresh code and registers it.
    pub async fn host_space(&self) -> Result<SpaceCode> {
        let code = SpaceCode::generate();
        self.create_space(&code).await?;
        Ok(code)
    }

    /// Succeeds when the space has a presence marker or at least one post.
    pub async fn join_space(&self, code: &SpaceCode) -> Result<()> {
        let marker = spaces_collection().doc(code.as_str());
        let registered = self
            .store
            .get_document(&marker)
            .await
            .map_err(AppError::Store)?
            .is_some();

        let exists = registered
            || self
                .store
                .count_documents(&posts_collection(code))
                .await
                .map_err(AppError::Store)?
                > 0;

        if !exists {
            debug!(space = %code, "join rejected, unknown space");
            return Err(AppError::not_found("Space", code.as_str()));
        }

        info!(space = %code, "space joined");
        Ok(())
    }
}
