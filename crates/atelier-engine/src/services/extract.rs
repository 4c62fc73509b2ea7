//! Ordered decision table for pulling artifact bytes out of a response.

use atelier_contracts::codec::ResourceCodec;
use atelier_contracts::error::{AtelierError, AtelierResult};
use atelier_contracts::runs::Capability;
use serde_json::Value;
use tracing::debug;

use crate::invoker::{FieldValue, ResponseBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Bytes already resolved from a resource reference.
    Bytes,
    /// Inline base64 text.
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub field: &'static str,
    pub shape: Shape,
}

const fn rule(field: &'static str, shape: Shape) -> Rule {
    Rule { field, shape }
}

pub const IMAGE_RULES: &[Rule] = &[
    rule("result", Shape::Bytes),
    rule("image", Shape::Bytes),
    rule("result", Shape::Base64),
    rule("image", Shape::Base64),
];

pub const MODEL_RULES: &[Rule] = &[
    rule("result", Shape::Bytes),
    rule("model", Shape::Bytes),
    rule("result", Shape::Base64),
    rule("model", Shape::Base64),
];

pub fn rules_for(capability: Capability) -> &'static [Rule] {
    match capability {
        Capability::TextToImage => IMAGE_RULES,
        Capability::ImageTo3d => MODEL_RULES,
    }
}

/// First matching row wins. A base64 row that fails to decode is remembered
/// and the walk continues; the last decode error is returned when no later
/// row matches.
pub fn extract_artifact(response: &ResponseBody, capability: Capability) -> AtelierResult<Vec<u8>> {
    let mut last_decode_error = None;
    for rule in rules_for(capability) {
        match (response.get(rule.field), rule.shape) {
            (Some(FieldValue::Bytes(bytes)), Shape::Bytes) if !bytes.is_empty() => {
                debug!(field = rule.field, "artifact taken from resolved bytes");
                return Ok(bytes.clone());
            }
            (Some(FieldValue::Json(Value::String(text))), Shape::Base64)
                if !text.trim().is_empty() =>
            {
                match ResourceCodec::decode(text) {
                    Ok(bytes) if !bytes.is_empty() => {
                        debug!(field = rule.field, "artifact decoded from base64");
                        return Ok(bytes);
                    }
                    Ok(_) => {}
                    Err(err) => last_decode_error = Some(err),
                }
            }
            _ => {}
        }
    }
    Err(last_decode_error.unwrap_or_else(|| AtelierError::NoArtifactInResponse {
        capability: capability.to_string(),
        fields: response.field_names(),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(value: Value) -> ResponseBody {
        ResponseBody::from_value(value)
    }

    #[test]
    fn resolved_bytes_beat_inline_base64() -> anyhow::Result<()> {
        let mut response = body(json!({"image": ResourceCodec::encode(b"inline")}));
        response.insert("result", FieldValue::Bytes(b"resolved".to_vec()));
        assert_eq!(extract_artifact(&response, Capability::TextToImage)?, b"resolved");
        Ok(())
    }

    #[test]
    fn result_base64_beats_image_base64() -> anyhow::Result<()> {
        let response = body(json!({
            "image": ResourceCodec::encode(b"from-image"),
            "result": ResourceCodec::encode(b"from-result"),
        }));
        assert_eq!(extract_artifact(&response, Capability::TextToImage)?, b"from-result");
        Ok(())
    }

    #[test]
    fn undecodable_row_falls_through_to_next() -> anyhow::Result<()> {
        let response = body(json!({
            "result": "%%% not base64 %%%",
            "model": ResourceCodec::encode(b"glTF"),
        }));
        assert_eq!(extract_artifact(&response, Capability::ImageTo3d)?, b"glTF");
        Ok(())
    }

    #[test]
    fn decode_error_is_reported_when_nothing_else_matches() {
        let response = body(json!({"result": "%%% not base64 %%%"}));
        let err = extract_artifact(&response, Capability::TextToImage).err();
        assert!(matches!(err, Some(AtelierError::MalformedEncoding(_))));
    }

    #[test]
    fn unknown_fields_mean_no_artifact() {
        let response = body(json!({"caption": "a cat", "model": "ignored-for-images"}));
        let err = extract_artifact(&response, Capability::TextToImage).err();
        match err {
            Some(AtelierError::NoArtifactInResponse { capability, fields }) => {
                assert_eq!(capability, "text_to_image");
                assert_eq!(fields, vec!["caption", "model"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn bytes_in_model_field_are_read_for_models_only() -> anyhow::Result<()> {
        let mut response = ResponseBody::default();
        response.insert("model", FieldValue::Bytes(b"glb".to_vec()));
        assert_eq!(extract_artifact(&response, Capability::ImageTo3d)?, b"glb");
        assert!(extract_artifact(&response, Capability::TextToImage).is_err());
        Ok(())
    }
}
