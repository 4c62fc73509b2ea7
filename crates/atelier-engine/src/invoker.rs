use std::sync::Arc;

use anyhow::anyhow;
use atelier_contracts::apps::{resource_fields, SchemaKind};
use atelier_contracts::error::{AtelierError, AtelierResult};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::registry::AppRegistry;

/// One response field after resource resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    Json(Value),
}

/// Response of a remote call, field by field in the order the app sent them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseBody {
    fields: IndexMap<String, FieldValue>,
}

impl ResponseBody {
    /// Object responses keep their fields; any other non-null value lands
    /// under `result`.
    pub fn from_value(value: Value) -> Self {
        let mut fields = IndexMap::new();
        match value {
            Value::Object(map) => {
                for (key, value) in map {
                    fields.insert(key, FieldValue::Json(value));
                }
            }
            Value::Null => {}
            other => {
                fields.insert("result".to_string(), FieldValue::Json(other));
            }
        }
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Sends requests over registry channels and dereferences resource fields.
pub struct RemoteInvoker {
    registry: Arc<AppRegistry>,
}

impl RemoteInvoker {
    pub fn new(registry: Arc<AppRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    pub fn call(&self, app_id: &str, body: &Value, caller_id: &str) -> AtelierResult<ResponseBody> {
        let channel = self.registry.channel(app_id)?;
        let raw = {
            let mut channel = channel
                .lock()
                .map_err(|_| AtelierError::remote(app_id, anyhow!("channel lock poisoned")))?;
            let handle = channel
                .execute(body, caller_id)
                .map_err(|err| AtelierError::remote(app_id, err))?;
            debug!(app_id, handle = %handle, "request sent");
            channel
                .get_response(&handle)
                .map_err(|err| AtelierError::remote(app_id, err))?
        };

        let mut response = ResponseBody::from_value(raw);
        self.resolve_resources(app_id, &mut response)?;
        info!(app_id, fields = ?response.field_names(), "remote call completed");
        Ok(response)
    }

    fn resolve_resources(&self, app_id: &str, response: &mut ResponseBody) -> AtelierResult<()> {
        let Ok(output_schema) = self.registry.schema(app_id, SchemaKind::Output) else {
            return Ok(());
        };
        let Some(endpoints) = self.registry.endpoints(app_id) else {
            return Ok(());
        };

        for field in resource_fields(output_schema) {
            let reid = match response.get(&field) {
                Some(FieldValue::Json(Value::String(reid))) if !reid.trim().is_empty() => {
                    reid.clone()
                }
                Some(FieldValue::Json(Value::Null | Value::String(_))) | None => continue,
                Some(FieldValue::Bytes(_)) => continue,
                Some(FieldValue::Json(other)) => {
                    return Err(AtelierError::remote(
                        app_id,
                        anyhow!("resource field '{field}' holds a non-reference value: {other}"),
                    ));
                }
            };
            let url = endpoints.resource_url(&reid);
            let bytes = self
                .registry
                .transport()
                .fetch_resource(&url)
                .map_err(|err| AtelierError::remote(app_id, err))?;
            debug!(app_id, field = %field, bytes = bytes.len(), "resource resolved");
            response.insert(field, FieldValue::Bytes(bytes));
        }
        Ok(())
    }
}
