//! Report configuration store (collaborator interface).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use reportforge_core::{ReportId, TenantId};
use reportforge_export::{DataQuery, ExportFormat};

/// What a report export needs to know about its report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub id: ReportId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Opaque dataset filter, passed through to the data source.
    pub query: DataQuery,
    /// Column order of the artifact.
    pub columns: Vec<String>,
    pub format: ExportFormat,
}

/// Report store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReportStoreError {
    #[error("report not found: {0}")]
    NotFound(ReportId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Report configuration lookup.
pub trait ReportConfigStore: Send + Sync {
    fn get(
        &self,
        tenant_id: TenantId,
        id: ReportId,
    ) -> Result<Option<ReportConfig>, ReportStoreError>;

    fn insert(&self, config: ReportConfig) -> Result<ReportId, ReportStoreError>;
}

/// In-memory report store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReportConfigStore {
    reports: RwLock<HashMap<ReportId, ReportConfig>>,
}

impl InMemoryReportConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ReportConfigStore for InMemoryReportConfigStore {
    fn get(
        &self,
        tenant_id: TenantId,
        id: ReportId,
    ) -> Result<Option<ReportConfig>, ReportStoreError> {
        let reports = self.reports.read().unwrap();
        match reports.get(&id) {
            Some(config) if config.tenant_id == tenant_id => Ok(Some(config.clone())),
            Some(_) => Err(ReportStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn insert(&self, config: ReportConfig) -> Result<ReportId, ReportStoreError> {
        let mut reports = self.reports.write().unwrap();
        let id = config.id;
        reports.insert(id, config);
        Ok(id)
    }
}

impl ReportConfigStore for Arc<InMemoryReportConfigStore> {
    fn get(
        &self,
        tenant_id: TenantId,
        id: ReportId,
    ) -> Result<Option<ReportConfig>, ReportStoreError> {
        (**self).get(tenant_id, id)
    }

    fn insert(&self, config: ReportConfig) -> Result<ReportId, ReportStoreError> {
        (**self).insert(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_isolation_on_lookup() {
        let store = InMemoryReportConfigStore::new();
        let tenant1 = TenantId::new();
        let tenant2 = TenantId::new();

        let id = store
            .insert(ReportConfig {
                id: ReportId::new(),
                tenant_id: tenant1,
                name: "invoices".to_string(),
                query: DataQuery::default(),
                columns: vec!["id".to_string()],
                format: ExportFormat::Csv,
            })
            .unwrap();

        assert!(store.get(tenant1, id).unwrap().is_some());
        assert!(matches!(
            store.get(tenant2, id),
            Err(ReportStoreError::TenantIsolation)
        ));
    }
}
