//! Maps a client-supplied model identifier to a catalog record.
//!
//! Resolution is a two-step chain: the primary key first, then the legacy
//! identifier field the UI shipped before catalog rows got stable keys.
//! The second step is a migration shim; dropping it later must not touch
//! any call site.

use anyhow::Result;
use thiserror::Error;

use crate::catalog::{ModelCatalog, ModelRecord};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Model {model_id} not found")]
    NotFound { model_id: String },
    #[error("Catalog lookup failed for {model_id}: {source}")]
    Catalog {
        model_id: String,
        #[source]
        source: anyhow::Error,
    },
}

pub async fn resolve_model(
    catalog: &dyn ModelCatalog,
    model_id: &str,
) -> Result<ModelRecord, ResolveError> {
    if let Some(record) = by_primary_key(catalog, model_id).await? {
        return Ok(record);
    }
    if let Some(record) = by_legacy_field(catalog, model_id).await? {
        return Ok(record);
    }
    Err(ResolveError::NotFound {
        model_id: model_id.to_string(),
    })
}

async fn by_primary_key(
    catalog: &dyn ModelCatalog,
    model_id: &str,
) -> Result<Option<ModelRecord>, ResolveError> {
    catalog
        .find_by_id(model_id)
        .await
        .map_err(|source| ResolveError::Catalog {
            model_id: model_id.to_string(),
            source,
        })
}

async fn by_legacy_field(
    catalog: &dyn ModelCatalog,
    model_id: &str,
) -> Result<Option<ModelRecord>, ResolveError> {
    catalog
        .find_by_legacy_id(model_id)
        .await
        .map_err(|source| ResolveError::Catalog {
            model_id: model_id.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MapCatalog {
        by_id: HashMap<String, ModelRecord>,
        by_legacy: HashMap<String, ModelRecord>,
    }

    fn record(id: &str) -> ModelRecord {
        ModelRecord {
            id: id.to_string(),
            legacy_id: None,
            name: format!("{id}-underlying"),
            display_name: format!("{id} display"),
            provider: "Test".to_string(),
            description: None,
            status: "active".to_string(),
        }
    }

    #[async_trait]
    impl ModelCatalog for MapCatalog {
        async fn find_by_id(&self, id: &str) -> Result<Option<ModelRecord>> {
            Ok(self.by_id.get(id).cloned())
        }

        async fn find_by_legacy_id(&self, id: &str) -> Result<Option<ModelRecord>> {
            Ok(self.by_legacy.get(id).cloned())
        }
    }

    #[tokio::test]
    async fn primary_key_wins() {
        let catalog = MapCatalog {
            by_id: HashMap::from([("m1".to_string(), record("m1"))]),
            by_legacy: HashMap::new(),
        };
        let resolved = resolve_model(&catalog, "m1").await.unwrap();
        assert_eq!(resolved.id, "m1");
    }

    #[tokio::test]
    async fn falls_back_to_legacy_field() {
        let catalog = MapCatalog {
            by_id: HashMap::new(),
            by_legacy: HashMap::from([("old-name".to_string(), record("m2"))]),
        };
        let resolved = resolve_model(&catalog, "old-name").await.unwrap();
        assert_eq!(resolved.id, "m2");
    }

    #[tokio::test]
    async fn miss_reports_the_requested_id() {
        let catalog = MapCatalog {
            by_id: HashMap::new(),
            by_legacy: HashMap::new(),
        };
        let err = resolve_model(&catalog, "ghost").await.unwrap_err();
        assert_eq!(err.to_string(), "Model ghost not found");
    }
}
