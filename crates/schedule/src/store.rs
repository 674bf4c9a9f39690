//! Schedule persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reportforge_core::{ReportId, ScheduleId, TenantId};
use reportforge_jobs::JobId;

use crate::spec::ScheduleSpec;

/// A recurring report schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub tenant_id: TenantId,
    pub report_id: ReportId,
    pub spec: ScheduleSpec,
    /// Notified when an occurrence completes.
    pub recipients: Vec<String>,
    /// Inactive schedules keep their history but are never re-armed.
    pub active: bool,
    /// Next computed occurrence.
    pub next_run_at: Option<DateTime<Utc>>,
    /// The currently armed queue entry, if any.
    pub queued_job: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        tenant_id: TenantId,
        report_id: ReportId,
        spec: ScheduleSpec,
        recipients: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ScheduleId::new(),
            tenant_id,
            report_id,
            spec,
            recipients,
            active: true,
            next_run_at: None,
            queued_job: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Schedule store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleStoreError {
    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("schedule already exists: {0}")]
    AlreadyExists(ScheduleId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Schedule store abstraction.
pub trait ScheduleStore: Send + Sync {
    fn insert(&self, schedule: Schedule) -> Result<ScheduleId, ScheduleStoreError>;

    fn get(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
    ) -> Result<Option<Schedule>, ScheduleStoreError>;

    fn update(&self, schedule: &Schedule) -> Result<(), ScheduleStoreError>;

    fn delete(&self, tenant_id: TenantId, id: ScheduleId) -> Result<(), ScheduleStoreError>;

    /// Active schedules for a tenant, oldest first.
    fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Schedule>, ScheduleStoreError>;
}

/// In-memory schedule store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<HashMap<ScheduleId, Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn insert(&self, schedule: Schedule) -> Result<ScheduleId, ScheduleStoreError> {
        let mut schedules = self.schedules.write().unwrap();
        if schedules.contains_key(&schedule.id) {
            return Err(ScheduleStoreError::AlreadyExists(schedule.id));
        }
        let id = schedule.id;
        schedules.insert(id, schedule);
        Ok(id)
    }

    fn get(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
    ) -> Result<Option<Schedule>, ScheduleStoreError> {
        let schedules = self.schedules.read().unwrap();
        match schedules.get(&id) {
            Some(s) if s.tenant_id == tenant_id => Ok(Some(s.clone())),
            Some(_) => Err(ScheduleStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn update(&self, schedule: &Schedule) -> Result<(), ScheduleStoreError> {
        let mut schedules = self.schedules.write().unwrap();
        if !schedules.contains_key(&schedule.id) {
            return Err(ScheduleStoreError::NotFound(schedule.id));
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    fn delete(&self, tenant_id: TenantId, id: ScheduleId) -> Result<(), ScheduleStoreError> {
        let mut schedules = self.schedules.write().unwrap();
        match schedules.get(&id) {
            Some(s) if s.tenant_id != tenant_id => Err(ScheduleStoreError::TenantIsolation),
            Some(_) => {
                schedules.remove(&id);
                Ok(())
            }
            None => Err(ScheduleStoreError::NotFound(id)),
        }
    }

    fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Schedule>, ScheduleStoreError> {
        let schedules = self.schedules.read().unwrap();
        let mut result: Vec<_> = schedules
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.active)
            .cloned()
            .collect();
        result.sort_by_key(|s| s.created_at);
        Ok(result)
    }
}

impl ScheduleStore for Arc<InMemoryScheduleStore> {
    fn insert(&self, schedule: Schedule) -> Result<ScheduleId, ScheduleStoreError> {
        (**self).insert(schedule)
    }

    fn get(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
    ) -> Result<Option<Schedule>, ScheduleStoreError> {
        (**self).get(tenant_id, id)
    }

    fn update(&self, schedule: &Schedule) -> Result<(), ScheduleStoreError> {
        (**self).update(schedule)
    }

    fn delete(&self, tenant_id: TenantId, id: ScheduleId) -> Result<(), ScheduleStoreError> {
        (**self).delete(tenant_id, id)
    }

    fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Schedule>, ScheduleStoreError> {
        (**self).list_active(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ScheduleSpec;

    fn test_schedule(tenant: TenantId) -> Schedule {
        Schedule::new(
            tenant,
            ReportId::new(),
            ScheduleSpec::daily(9, 0),
            vec!["ops@example.com".to_string()],
        )
    }

    #[test]
    fn insert_get_update_delete() {
        let store = InMemoryScheduleStore::new();
        let tenant = TenantId::new();

        let mut schedule = test_schedule(tenant);
        let id = store.insert(schedule.clone()).unwrap();

        let loaded = store.get(tenant, id).unwrap().unwrap();
        assert!(loaded.active);

        schedule.active = false;
        store.update(&schedule).unwrap();
        assert!(!store.get(tenant, id).unwrap().unwrap().active);

        store.delete(tenant, id).unwrap();
        assert!(store.get(tenant, id).unwrap().is_none());
    }

    #[test]
    fn tenant_isolation() {
        let store = InMemoryScheduleStore::new();
        let tenant1 = TenantId::new();
        let tenant2 = TenantId::new();

        let id = store.insert(test_schedule(tenant1)).unwrap();

        assert!(matches!(
            store.get(tenant2, id),
            Err(ScheduleStoreError::TenantIsolation)
        ));
        assert!(matches!(
            store.delete(tenant2, id),
            Err(ScheduleStoreError::TenantIsolation)
        ));
        assert!(store.list_active(tenant2).unwrap().is_empty());
    }

    #[test]
    fn list_active_excludes_deactivated() {
        let store = InMemoryScheduleStore::new();
        let tenant = TenantId::new();

        let mut first = test_schedule(tenant);
        first.active = false;
        store.insert(first).unwrap();
        store.insert(test_schedule(tenant)).unwrap();

        assert_eq!(store.list_active(tenant).unwrap().len(), 1);
    }
}
