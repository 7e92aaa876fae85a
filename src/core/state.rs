use std::sync::Arc;

use crate::core::config::Settings;
use crate::core::retry::RetryPolicy;
use crate::services::audit::AuditHandle;
use crate::store::ExamStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn ExamStore>,
    audit: AuditHandle,
    retry: RetryPolicy,
}

impl AppState {
    pub(crate) fn new(settings: Settings, store: Arc<dyn ExamStore>, audit: AuditHandle) -> Self {
        let retry = RetryPolicy::from_settings(&settings);
        Self { inner: Arc::new(InnerState { settings, store, audit, retry }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn ExamStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn audit(&self) -> &AuditHandle {
        &self.inner.audit
    }

    pub(crate) fn retry(&self) -> RetryPolicy {
        self.inner.retry
    }
}
