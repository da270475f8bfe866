//! Fleet registry - printer lifecycle mediator
//!
//! Holds the two keyed collections everything else goes through: the
//! configuration cache mirrored from the durable store, and the live
//! sessions created on demand. At most one live session ever exists
//! per printer id.

use gantry_core::{PrinterConfig, StatusSnapshot};
use gantry_mqtt::PrinterSession;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::store::ConfigStore;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("printer {0} not found")]
    NotFound(String),
    #[error("connection test failed: {0}")]
    ConnectionTest(String),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Caller-supplied fields for creating or updating a printer record
#[derive(Debug, Clone, Deserialize)]
pub struct PrinterRequest {
    pub name: String,
    pub host: String,
    pub access_code: String,
    pub serial: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Merged configuration + status view returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct PrinterView {
    pub id: String,
    pub name: String,
    pub host: String,
    pub serial: String,
    pub enabled: bool,
    pub status: StatusSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

impl PrinterView {
    fn new(config: &PrinterConfig, status: StatusSnapshot, connection_error: Option<String>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            host: config.host.clone(),
            serial: config.serial.clone(),
            enabled: config.enabled,
            status,
            connection_error,
        }
    }

    /// View for a printer that was not contacted: last-known model and
    /// firmware from the record, everything else at defaults,
    /// reachable false.
    fn idle(config: &PrinterConfig) -> Self {
        let status = StatusSnapshot {
            model: config.model.clone().unwrap_or_default(),
            firmware: config.firmware.clone().unwrap_or_default(),
            ..StatusSnapshot::default()
        };
        Self::new(config, status, None)
    }
}

pub struct FleetRegistry {
    store: Arc<dyn ConfigStore>,
    configs: RwLock<HashMap<String, PrinterConfig>>,
    sessions: RwLock<HashMap<String, Arc<PrinterSession>>>,
}

impl FleetRegistry {
    /// Create a registry mirroring the store's records
    pub fn open(store: Arc<dyn ConfigStore>) -> Result<Self, RegistryError> {
        let configs = store
            .load_all()?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        Ok(Self {
            store,
            configs: RwLock::new(configs),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Register a new printer and return its identity key.
    ///
    /// With `test_connection` set, a throwaway session is connected
    /// first and the record is only persisted when that succeeds; the
    /// throwaway is torn down either way.
    pub async fn add(
        &self,
        request: PrinterRequest,
        test_connection: bool,
    ) -> Result<String, RegistryError> {
        let config = PrinterConfig::new(
            request.name,
            request.host,
            request.access_code,
            request.serial,
            request.enabled,
        );

        if test_connection {
            let probe = PrinterSession::new(&config.host, &config.serial, &config.access_code);
            let outcome = probe.connect().await;
            probe.disconnect().await;
            if let Err(e) = outcome {
                return Err(RegistryError::ConnectionTest(e.to_string()));
            }
        }

        self.store.insert(&config)?;
        let id = config.id.clone();
        self.configs.write().await.insert(id.clone(), config);
        info!(printer = %id, "printer added");
        Ok(id)
    }

    /// Update a printer's record.
    ///
    /// A changed host or access code tears down any live session so
    /// the next access reconnects with the new parameters; sessions
    /// are never reused across a credential change.
    pub async fn update(&self, id: &str, request: PrinterRequest) -> Result<(), RegistryError> {
        let (config, credentials_changed) = {
            let mut configs = self.configs.write().await;
            let config = configs
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let credentials_changed =
                config.host != request.host || config.access_code != request.access_code;
            config.name = request.name;
            config.host = request.host;
            config.access_code = request.access_code;
            config.serial = request.serial;
            config.enabled = request.enabled;
            (config.clone(), credentials_changed)
        };

        if credentials_changed {
            self.drop_session(id).await;
        }
        self.store.update(&config)?;
        info!(printer = %id, credentials_changed, "printer updated");
        Ok(())
    }

    /// Remove a printer. Unknown ids are a no-op reported as `false`.
    pub async fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        self.drop_session(id).await;
        let existed = self.configs.write().await.remove(id).is_some();
        if existed {
            self.store.remove(id)?;
            info!(printer = %id, "printer removed");
        }
        Ok(existed)
    }

    /// Current status of one printer.
    ///
    /// Disabled printers are reported unreachable without touching any
    /// session. Session-layer failures become a per-call
    /// `connection_error` on the view, never an error of this call.
    pub async fn status_of(&self, id: &str) -> Result<PrinterView, RegistryError> {
        let config = self
            .configs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if !config.enabled {
            return Ok(PrinterView::idle(&config));
        }

        let session = self.session_for(&config).await;
        let (snapshot, connection_error) = match session.request_status().await {
            Ok(snapshot) => (snapshot, None),
            Err(e) => (session.snapshot().await, Some(e.to_string())),
        };
        self.write_back(&config, &snapshot).await;
        Ok(PrinterView::new(&config, snapshot, connection_error))
    }

    /// Status of every printer, queried concurrently. One printer's
    /// failure never affects the others.
    pub async fn status_of_all(self: &Arc<Self>) -> Vec<PrinterView> {
        let ids: Vec<String> = self.configs.read().await.keys().cloned().collect();
        let mut tasks = JoinSet::new();
        for id in ids {
            let registry = Arc::clone(self);
            tasks.spawn(async move { registry.status_of(&id).await });
        }

        let mut views = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(view)) => views.push(view),
                // Removed concurrently between listing and querying
                Ok(Err(e)) => debug!(error = %e, "printer skipped"),
                Err(e) => warn!(error = %e, "status task failed"),
            }
        }
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    /// Addresses of all configured printers, for cross-referencing
    /// discovery results
    pub async fn known_addresses(&self) -> HashSet<IpAddr> {
        self.configs
            .read()
            .await
            .values()
            .filter_map(|c| c.host.parse().ok())
            .collect()
    }

    /// Dispose every live session. Idempotent.
    pub async fn teardown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (id, session) in sessions {
            session.disconnect().await;
            debug!(printer = %id, "session closed");
        }
    }

    /// Get or lazily create the session for a record.
    ///
    /// The entry insertion is one atomic map operation and session
    /// construction does no I/O, so concurrent callers for the same
    /// key always end up sharing a single session.
    async fn session_for(&self, config: &PrinterConfig) -> Arc<PrinterSession> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(config.id.clone())
            .or_insert_with(|| {
                Arc::new(PrinterSession::new(
                    &config.host,
                    &config.serial,
                    &config.access_code,
                ))
            })
            .clone()
    }

    async fn drop_session(&self, id: &str) {
        let session = self.sessions.write().await.remove(id);
        if let Some(session) = session {
            session.disconnect().await;
            debug!(printer = %id, "session torn down");
        }
    }

    /// Persist newly detected model/firmware strings back to the
    /// record. Opportunistic: store failures are logged, not raised.
    async fn write_back(&self, config: &PrinterConfig, snapshot: &StatusSnapshot) {
        let model_changed = !snapshot.model.is_empty()
            && config.model.as_deref() != Some(snapshot.model.as_str());
        let firmware_changed = !snapshot.firmware.is_empty()
            && config.firmware.as_deref() != Some(snapshot.firmware.as_str());
        if !model_changed && !firmware_changed {
            return;
        }

        let updated = {
            let mut configs = self.configs.write().await;
            let Some(entry) = configs.get_mut(&config.id) else {
                return;
            };
            if model_changed {
                entry.model = Some(snapshot.model.clone());
            }
            if firmware_changed {
                entry.firmware = Some(snapshot.firmware.clone());
            }
            entry.clone()
        };

        if let Err(e) = self.store.update(&updated) {
            warn!(printer = %config.id, error = %e, "failed to persist detected model/firmware");
        }
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(host: &str) -> PrinterRequest {
        PrinterRequest {
            name: "left".to_string(),
            host: host.to_string(),
            access_code: "12345678".to_string(),
            serial: "01P00A123456789".to_string(),
            enabled: true,
        }
    }

    fn registry() -> (Arc<FleetRegistry>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(FleetRegistry::open(store.clone() as Arc<dyn ConfigStore>).unwrap());
        (registry, store)
    }

    #[tokio::test]
    async fn test_status_of_unknown_printer() {
        let (registry, _) = registry();
        let result = registry.status_of("missing").await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_without_test_creates_no_session() {
        let (registry, store) = registry();
        let id = registry.add(request("192.168.1.40"), false).await.unwrap();
        assert!(store.contains(&id));
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_add_with_failing_connection_test_persists_nothing() {
        let (registry, store) = registry();
        // Nothing listens on the service port on loopback, so the
        // probe connection fails.
        let result = registry.add(request("127.0.0.1"), true).await;
        assert!(matches!(result, Err(RegistryError::ConnectionTest(_))));
        assert_eq!(store.len(), 0);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_printer_reports_unreachable_without_session() {
        let (registry, _) = registry();
        let mut req = request("192.168.1.40");
        req.enabled = false;
        let id = registry.add(req, false).await.unwrap();

        let view = registry.status_of(&id).await.unwrap();
        assert!(!view.status.reachable);
        assert!(view.connection_error.is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_get_or_create_yields_one_session() {
        let (registry, _) = registry();
        let id = registry.add(request("192.168.1.40"), false).await.unwrap();
        let config = registry.configs.read().await.get(&id).cloned().unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let config = config.clone();
            tasks.spawn(async move { registry.session_for(&config).await });
        }
        let mut sessions = Vec::new();
        while let Some(result) = tasks.join_next().await {
            sessions.push(result.unwrap());
        }

        assert_eq!(registry.session_count().await, 1);
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
    }

    #[tokio::test]
    async fn test_credential_change_invalidates_session() {
        let (registry, _) = registry();
        let id = registry.add(request("192.168.1.40"), false).await.unwrap();
        let config = registry.configs.read().await.get(&id).cloned().unwrap();
        registry.session_for(&config).await;
        assert_eq!(registry.session_count().await, 1);

        registry.update(&id, request("192.168.1.99")).await.unwrap();
        assert_eq!(registry.session_count().await, 0);

        let updated = registry.configs.read().await.get(&id).cloned().unwrap();
        assert_eq!(updated.host, "192.168.1.99");
    }

    #[tokio::test]
    async fn test_update_without_credential_change_keeps_session() {
        let (registry, _) = registry();
        let id = registry.add(request("192.168.1.40"), false).await.unwrap();
        let config = registry.configs.read().await.get(&id).cloned().unwrap();
        registry.session_for(&config).await;

        let mut renamed = request("192.168.1.40");
        renamed.name = "renamed".to_string();
        registry.update(&id, renamed).await.unwrap();
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_printer() {
        let (registry, _) = registry();
        let result = registry.update("missing", request("192.168.1.40")).await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let (registry, _) = registry();
        assert!(!registry.remove("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_drops_session_and_record() {
        let (registry, store) = registry();
        let id = registry.add(request("192.168.1.40"), false).await.unwrap();
        let config = registry.configs.read().await.get(&id).cloned().unwrap();
        registry.session_for(&config).await;

        assert!(registry.remove(&id).await.unwrap());
        assert_eq!(registry.session_count().await, 0);
        assert!(!store.contains(&id));
        assert!(matches!(
            registry.status_of(&id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_of_unreachable_printer_isolates_error() {
        let (registry, _) = registry();
        let id = registry.add(request("127.0.0.1"), false).await.unwrap();

        let view = registry.status_of(&id).await.unwrap();
        assert!(view.connection_error.is_some());
        assert!(!view.status.reachable);
    }

    #[tokio::test]
    async fn test_status_of_all_isolates_failures() {
        let (registry, _) = registry();
        let mut disabled = request("192.168.1.40");
        disabled.name = "disabled".to_string();
        disabled.enabled = false;
        registry.add(disabled, false).await.unwrap();

        let mut dead = request("127.0.0.1");
        dead.name = "dead".to_string();
        registry.add(dead, false).await.unwrap();

        let views = registry.status_of_all().await;
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| !v.status.reachable));
        let dead_view = views.iter().find(|v| v.name == "dead").unwrap();
        assert!(dead_view.connection_error.is_some());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (registry, _) = registry();
        let id = registry.add(request("192.168.1.40"), false).await.unwrap();
        let config = registry.configs.read().await.get(&id).cloned().unwrap();
        registry.session_for(&config).await;

        registry.teardown().await;
        assert_eq!(registry.session_count().await, 0);
        registry.teardown().await;
    }

    #[tokio::test]
    async fn test_open_mirrors_existing_records() {
        let config = PrinterConfig::new(
            "left".to_string(),
            "192.168.1.40".to_string(),
            "12345678".to_string(),
            "01P00A123456789".to_string(),
            true,
        );
        let store = Arc::new(MemoryStore::with_records([config.clone()]));
        let registry = FleetRegistry::open(store as Arc<dyn ConfigStore>).unwrap();
        assert!(registry.configs.read().await.contains_key(&config.id));
    }

    #[tokio::test]
    async fn test_known_addresses_parse_hosts() {
        let (registry, _) = registry();
        registry.add(request("192.168.1.40"), false).await.unwrap();
        let known = registry.known_addresses().await;
        assert!(known.contains(&"192.168.1.40".parse::<IpAddr>().unwrap()));
    }
}
