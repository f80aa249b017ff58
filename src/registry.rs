//! Callback registry: which endpoints want to hear about which task.
//!
//! Registrations are keyed by `(task_id, client_id)`; registering the same
//! client again replaces its endpoint instead of adding a second one.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One client's delivery endpoint for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub client_id: String,
    pub callback_url: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistrationResult {
    /// Distinct registrants for the task after this call.
    pub registered_callbacks: usize,
    /// Whether an earlier endpoint of the same client was replaced.
    pub replaced: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryTotals {
    pub registrations: usize,
    pub tasks: usize,
}

#[derive(Debug, Default)]
pub struct CallbackRegistry {
    callbacks: DashMap<String, Vec<Registration>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the endpoint of `client_id` for `task_id`. Never fails and never
    /// checks whether the endpoint is reachable.
    pub fn register(&self, task_id: &str, client_id: &str, callback_url: &str) -> RegistrationResult {
        let registration = Registration {
            client_id: client_id.to_string(),
            callback_url: callback_url.to_string(),
            registered_at: Utc::now(),
        };

        let mut entries = self.callbacks.entry(task_id.to_string()).or_default();
        let replaced = match entries.iter_mut().find(|r| r.client_id == client_id) {
            Some(existing) => {
                *existing = registration;
                true
            }
            None => {
                entries.push(registration);
                false
            }
        };

        RegistrationResult {
            registered_callbacks: entries.len(),
            replaced,
        }
    }

    /// Snapshot of the current registrations, one per client.
    pub fn list(&self, task_id: &str) -> Vec<Registration> {
        self.callbacks
            .get(task_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Remove one registrant. Returns `false` if it was not registered.
    pub fn unregister(&self, task_id: &str, client_id: &str) -> bool {
        let removed = match self.callbacks.get_mut(task_id) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|r| r.client_id != client_id);
                entries.len() < before
            }
            None => false,
        };
        self.callbacks.remove_if(task_id, |_, entries| entries.is_empty());
        removed
    }

    /// Take every registration of a task at once.
    ///
    /// Anything registered after this call starts a fresh set.
    pub fn drain(&self, task_id: &str) -> Vec<Registration> {
        self.callbacks
            .remove(task_id)
            .map(|(_, entries)| entries)
            .unwrap_or_default()
    }

    pub fn count(&self, task_id: &str) -> usize {
        self.callbacks.get(task_id).map_or(0, |entries| entries.len())
    }

    pub fn totals(&self) -> RegistryTotals {
        self.callbacks
            .iter()
            .fold(RegistryTotals::default(), |mut totals, entries| {
                totals.registrations += entries.len();
                totals.tasks += 1;
                totals
            })
    }
}
