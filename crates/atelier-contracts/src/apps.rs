use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::form_urlencoded::byte_serialize;

pub const TEXT_TO_IMAGE_APP_ID: &str = "f0997a01-d6d3-a5fe-53d8-561300318557";
pub const IMAGE_TO_3D_APP_ID: &str = "69543f29-4d41-4afc-7f29-3d51591f11eb";
pub const DEFAULT_APP_DOMAIN: &str = "node3.openfabric.network";

pub type AppId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Input,
    Output,
}

impl SchemaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends the app domain unless `app_id` already carries it.
pub fn resolve_address(app_id: &str, domain: &str) -> String {
    let base = app_id.trim().trim_matches('/');
    let domain = domain.trim().trim_matches('.');
    if domain.is_empty() || base.contains(&format!(".{domain}")) || base.ends_with(domain) {
        return base.to_string();
    }
    format!("{base}.{domain}")
}

/// URLs of one remote app, derived from its resolved address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEndpoints {
    pub address: String,
    secure: bool,
}

impl AppEndpoints {
    pub fn new(address: impl Into<String>, secure: bool) -> Self {
        Self {
            address: address.into(),
            secure,
        }
    }

    fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.address)
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/manifest", self.http_base())
    }

    pub fn schema_url(&self, kind: SchemaKind) -> String {
        format!("{}/schema?type={}", self.http_base(), kind.as_str())
    }

    pub fn channel_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}/app", self.address)
    }

    pub fn resource_url(&self, reid: &str) -> String {
        let reid: String = byte_serialize(reid.trim().as_bytes()).collect();
        format!("{}/resource?reid={reid}", self.http_base())
    }
}

/// Metadata document of a remote app. The full document is kept in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub raw: Value,
}

impl AppManifest {
    pub fn from_value(raw: Value) -> Self {
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            name: text("name"),
            version: text("version"),
            description: text("description").or_else(|| text("capability")),
            raw: raw.clone(),
        }
    }
}

/// How a declared output field carries its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Inline,
    /// A reference token that must be fetched from the app's resource endpoint.
    Resource,
}

/// Input and output schema documents of one app; either may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaPair {
    pub input: Option<Value>,
    pub output: Option<Value>,
}

impl SchemaPair {
    pub fn get(&self, kind: SchemaKind) -> Option<&Value> {
        match kind {
            SchemaKind::Input => self.input.as_ref(),
            SchemaKind::Output => self.output.as_ref(),
        }
    }

    pub fn set(&mut self, kind: SchemaKind, schema: Value) {
        match kind {
            SchemaKind::Input => self.input = Some(schema),
            SchemaKind::Output => self.output = Some(schema),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }
}

/// Declared properties of a schema document. Top-level maps without a
/// `properties` key are treated as the property table itself.
pub fn schema_properties(schema: &Value) -> Option<&Map<String, Value>> {
    let obj = schema.as_object()?;
    match obj.get("properties").and_then(Value::as_object) {
        Some(properties) => Some(properties),
        None if !obj.contains_key("type") => Some(obj),
        None => None,
    }
}

pub fn field_kind(declaration: &Value) -> FieldKind {
    let Some(obj) = declaration.as_object() else {
        return FieldKind::Inline;
    };
    let marked = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(|value| value.trim().eq_ignore_ascii_case("resource"))
            .unwrap_or(false)
    };
    let ref_is_resource = obj
        .get("$ref")
        .and_then(Value::as_str)
        .map(|value| value.trim_end().ends_with("Resource"))
        .unwrap_or(false);
    if marked("format") || marked("type") || ref_is_resource {
        FieldKind::Resource
    } else {
        FieldKind::Inline
    }
}

/// Names of the fields an output schema marks as resource indirections.
pub fn resource_fields(schema: &Value) -> Vec<String> {
    let Some(properties) = schema_properties(schema) else {
        return Vec::new();
    };
    properties
        .iter()
        .filter(|(_, declaration)| field_kind(declaration) == FieldKind::Resource)
        .map(|(name, _)| name.clone())
        .collect()
}
