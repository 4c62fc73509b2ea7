use std::sync::{Arc, Mutex};

use anyhow::Result;
use atelier_contracts::apps::{resolve_address, AppEndpoints, AppId, AppManifest, SchemaKind, SchemaPair};
use atelier_contracts::config::PipelineConfig;
use atelier_contracts::error::{AtelierError, AtelierResult};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::transport::{AppChannel, AppTransport};

/// Availability of one configured app, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppStatus {
    pub app_id: AppId,
    pub address: String,
    pub name: Option<String>,
    pub available: bool,
    pub failures: Vec<String>,
}

struct AppEntry {
    endpoints: AppEndpoints,
    manifest: Option<AppManifest>,
    schemas: SchemaPair,
    channel: Option<Mutex<Box<dyn AppChannel>>>,
    failures: Vec<String>,
}

/// Manifests, schemas and live channels of every configured app.
///
/// The table is fixed after [`AppRegistry::initialize`]; each channel sits
/// behind its own lock so one request/response exchange never interleaves
/// with another on the same app.
pub struct AppRegistry {
    entries: IndexMap<AppId, AppEntry>,
    transport: Arc<dyn AppTransport>,
}

impl AppRegistry {
    /// Connects to every app in order. Failures are recorded per app and
    /// never abort initialization.
    pub fn initialize<I, S>(
        app_ids: I,
        domain: &str,
        secure: bool,
        transport: Arc<dyn AppTransport>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = IndexMap::new();
        for app_id in app_ids {
            let app_id = app_id.as_ref().trim();
            if app_id.is_empty() || entries.contains_key(app_id) {
                continue;
            }
            let endpoints = AppEndpoints::new(resolve_address(app_id, domain), secure);
            let entry = connect_app(app_id, endpoints, transport.as_ref());
            entries.insert(app_id.to_string(), entry);
        }
        Self { entries, transport }
    }

    pub fn from_config(config: &PipelineConfig, transport: Arc<dyn AppTransport>) -> Self {
        Self::initialize(
            &config.app_ids,
            &config.app_domain,
            config.secure_transport,
            transport,
        )
    }

    pub fn app_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_available(&self, app_id: &str) -> bool {
        self.entries
            .get(app_id)
            .map(|entry| entry.channel.is_some())
            .unwrap_or(false)
    }

    pub fn manifest(&self, app_id: &str) -> Option<&AppManifest> {
        self.entries.get(app_id)?.manifest.as_ref()
    }

    pub fn schema(&self, app_id: &str, kind: SchemaKind) -> AtelierResult<&Value> {
        self.entries
            .get(app_id)
            .and_then(|entry| entry.schemas.get(kind))
            .ok_or_else(|| AtelierError::SchemaNotFound {
                app_id: app_id.to_string(),
                kind: kind.to_string(),
            })
    }

    pub fn endpoints(&self, app_id: &str) -> Option<&AppEndpoints> {
        self.entries.get(app_id).map(|entry| &entry.endpoints)
    }

    pub fn statuses(&self) -> Vec<AppStatus> {
        self.entries
            .iter()
            .map(|(app_id, entry)| AppStatus {
                app_id: app_id.clone(),
                address: entry.endpoints.address.clone(),
                name: entry
                    .manifest
                    .as_ref()
                    .and_then(|manifest| manifest.name.clone()),
                available: entry.channel.is_some(),
                failures: entry.failures.clone(),
            })
            .collect()
    }

    pub(crate) fn channel(&self, app_id: &str) -> AtelierResult<&Mutex<Box<dyn AppChannel>>> {
        self.entries
            .get(app_id)
            .and_then(|entry| entry.channel.as_ref())
            .ok_or_else(|| AtelierError::ConnectionMissing {
                app_id: app_id.to_string(),
            })
    }

    pub(crate) fn transport(&self) -> &dyn AppTransport {
        self.transport.as_ref()
    }
}

impl Drop for AppRegistry {
    fn drop(&mut self) {
        for (app_id, entry) in self.entries.iter_mut() {
            if let Some(channel) = entry.channel.as_mut() {
                match channel.get_mut() {
                    Ok(channel) => channel.close(),
                    Err(_) => warn!(app_id = %app_id, "channel lock poisoned at shutdown"),
                }
            }
        }
    }
}

fn connect_app(app_id: &str, endpoints: AppEndpoints, transport: &dyn AppTransport) -> AppEntry {
    let mut failures = Vec::new();
    let mut record = |what: &str, result: Result<Value>| -> Option<Value> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let reason = AtelierError::Connectivity {
                    app_id: app_id.to_string(),
                    reason: format!("{what}: {err:#}"),
                };
                warn!(app_id, error = %reason, "app document unavailable");
                failures.push(reason.to_string());
                None
            }
        }
    };

    let manifest = record("manifest", transport.fetch_document(&endpoints.manifest_url()))
        .map(AppManifest::from_value);
    let mut schemas = SchemaPair::default();
    for kind in [SchemaKind::Input, SchemaKind::Output] {
        let label = format!("{kind} schema");
        if let Some(schema) = record(&label, transport.fetch_document(&endpoints.schema_url(kind))) {
            schemas.set(kind, schema);
        }
    }

    let channel = if manifest.is_some() && schemas.is_complete() {
        match transport.open_channel(&endpoints.channel_url()) {
            Ok(channel) => Some(Mutex::new(channel)),
            Err(err) => {
                let reason = AtelierError::Connectivity {
                    app_id: app_id.to_string(),
                    reason: format!("channel: {err:#}"),
                };
                warn!(app_id, error = %reason, "app channel unavailable");
                failures.push(reason.to_string());
                None
            }
        }
    } else {
        None
    };

    if channel.is_some() {
        info!(
            app_id,
            address = %endpoints.address,
            name = manifest.as_ref().and_then(|m| m.name.as_deref()).unwrap_or(""),
            "app connected"
        );
    }

    AppEntry {
        endpoints,
        manifest,
        schemas,
        channel,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::FakeTransport;

    #[test]
    fn reachable_and_unreachable_apps_are_recorded_separately() {
        let transport = Arc::new(FakeTransport::new().with_app(
            "app-up.test.local",
            json!({"name": "Up"}),
            json!({"properties": {"prompt": {"type": "string"}}}),
            json!({"properties": {"result": {"format": "resource"}}}),
            Ok(json!({})),
        ));
        let registry = AppRegistry::initialize(["app-up", "app-down"], "test.local", true, transport);

        assert!(registry.is_available("app-up"));
        assert!(!registry.is_available("app-down"));
        assert!(!registry.is_available("never-configured"));
        assert_eq!(registry.manifest("app-up").and_then(|m| m.name.as_deref()), Some("Up"));

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].failures.is_empty());
        assert_eq!(statuses[1].failures.len(), 3);
    }

    #[test]
    fn schema_lookup_reports_missing_kind() -> anyhow::Result<()> {
        let transport = Arc::new(
            FakeTransport::new()
                .with_app(
                    "app-up.test.local",
                    json!({"name": "Up"}),
                    json!({"properties": {"prompt": {"type": "string"}}}),
                    json!({"properties": {}}),
                    Ok(json!({})),
                )
                .without_document("https://app-up.test.local/schema?type=output"),
        );
        let registry = AppRegistry::initialize(["app-up"], "test.local", true, transport);

        assert!(registry.schema("app-up", SchemaKind::Input)?.is_object());
        let err = registry.schema("app-up", SchemaKind::Output).err();
        assert_eq!(
            err.map(|e| e.to_string()),
            Some("output schema not found for app ID: app-up".to_string())
        );
        assert!(!registry.is_available("app-up"));
        assert!(matches!(
            registry.channel("app-up").err(),
            Some(AtelierError::ConnectionMissing { .. })
        ));
        Ok(())
    }

    #[test]
    fn manifest_failure_does_not_stop_schema_fetches() -> anyhow::Result<()> {
        let transport = Arc::new(
            FakeTransport::new()
                .with_app(
                    "app-up.test.local",
                    json!({"name": "Up"}),
                    json!({"properties": {"prompt": {"type": "string"}}}),
                    json!({"properties": {}}),
                    Ok(json!({})),
                )
                .without_document("https://app-up.test.local/manifest"),
        );
        let registry = AppRegistry::initialize(["app-up"], "test.local", true, transport);

        assert!(registry.manifest("app-up").is_none());
        assert!(registry.schema("app-up", SchemaKind::Input).is_ok());
        assert!(registry.schema("app-up", SchemaKind::Output).is_ok());
        assert!(!registry.is_available("app-up"));
        Ok(())
    }

    #[test]
    fn refused_channel_keeps_documents_but_marks_unavailable() -> anyhow::Result<()> {
        let transport = Arc::new(
            FakeTransport::new()
                .with_app(
                    "app-up.test.local",
                    json!({"name": "Up"}),
                    json!({"properties": {"prompt": {"type": "string"}}}),
                    json!({"properties": {}}),
                    Ok(json!({})),
                )
                .refusing_channel("app-up.test.local"),
        );
        let registry = AppRegistry::initialize(["app-up"], "test.local", true, transport);

        assert!(!registry.is_available("app-up"));
        assert!(registry.schema("app-up", SchemaKind::Output).is_ok());
        let statuses = registry.statuses();
        assert_eq!(statuses[0].failures.len(), 1);
        assert!(statuses[0].failures[0].contains("connection refused"));
        Ok(())
    }

    #[test]
    fn duplicate_ids_are_connected_once() {
        let transport = Arc::new(FakeTransport::new());
        let registry = AppRegistry::initialize(["a", "a", " ", "b"], "test.local", false, transport);
        let ids: Vec<&str> = registry.app_ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn dropping_registry_closes_channels() {
        let transport = FakeTransport::new().with_app(
            "app-up.test.local",
            json!({}),
            json!({}),
            json!({}),
            Ok(json!({})),
        );
        let closed = transport.closed_counter();
        let registry =
            AppRegistry::initialize(["app-up"], "test.local", true, Arc::new(transport));
        assert!(registry.is_available("app-up"));
        drop(registry);
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
