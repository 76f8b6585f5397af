//! Reading and writing export files
//!
//! Accepts current and 1.0 envelopes as well as a bare template document.

use crate::error::{Result, TemplateError};
use crate::storage::json_store::write_json_atomic;
use crate::templates::MessageTemplate;
use serde_json::Value;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::types::*;

/// Parse an export document
pub fn parse_envelope(data: &[u8]) -> Result<ExportEnvelope> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| TemplateError::Import(format!("Invalid JSON: {}", e)))?;

    let Some(object) = value.as_object() else {
        return Err(TemplateError::Import(
            "Export document must be a JSON object".to_string(),
        ));
    };

    if let Some(info) = object.get("export_info") {
        let version = info
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !SUPPORTED_FORMAT_VERSIONS.contains(&version) {
            return Err(TemplateError::Import(format!(
                "Unsupported export version: {:?}",
                version
            )));
        }

        let mut envelope: ExportEnvelope = serde_json::from_value(value)
            .map_err(|e| TemplateError::Import(format!("Malformed export envelope: {}", e)))?;
        if envelope.export_info.template_count != envelope.templates.len() {
            debug!(
                "Export header lists {} templates, body has {}",
                envelope.export_info.template_count,
                envelope.templates.len()
            );
        }
        envelope.export_info.template_count = envelope.templates.len();
        return Ok(envelope);
    }

    if object.contains_key("id") {
        let template: MessageTemplate = serde_json::from_value(value)
            .map_err(|e| TemplateError::Import(format!("Malformed template: {}", e)))?;
        let mut envelope = ExportEnvelope::new();
        envelope.export_info.version = "1.0".to_string();
        envelope.templates.push(template);
        envelope.finalize();
        return Ok(envelope);
    }

    Err(TemplateError::Import(
        "Document is neither an export envelope nor a template".to_string(),
    ))
}

/// Load an export file
pub async fn read_envelope(path: &Path) -> Result<ExportEnvelope> {
    let data = fs::read(path).await?;
    parse_envelope(&data)
}

/// Write an export file
pub async fn write_envelope(path: &Path, envelope: &ExportEnvelope) -> Result<()> {
    write_json_atomic(path, envelope).await?;
    debug!(
        "Wrote export of {} templates to {:?}",
        envelope.templates.len(),
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_current_envelope() {
        let mut envelope = ExportEnvelope::new();
        envelope
            .templates
            .push(MessageTemplate::email("t1", "Welcome", "Hi", "Hello {name}"));
        envelope.finalize();

        let data = serde_json::to_vec(&envelope).unwrap();
        let parsed = parse_envelope(&data).unwrap();
        assert_eq!(parsed.export_info.version, EXPORT_FORMAT_VERSION);
        assert_eq!(parsed.templates[0].id, "t1");
        assert!(parsed.versions.is_none());
    }

    #[test]
    fn test_parse_legacy_envelope() {
        let data = br#"{
            "export_info": {"version": "1.0", "exported_at": "2024-01-01T00:00:00Z"},
            "templates": [{
                "id": "old",
                "name": "Old",
                "channels": ["whatsapp"],
                "whatsapp_content": "Hi {name}",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }]
        }"#;

        let parsed = parse_envelope(data).unwrap();
        assert_eq!(parsed.export_info.template_count, 1);
        assert!(parsed.metadata.is_empty());
        assert_eq!(parsed.templates[0].language, "en");
    }

    #[test]
    fn test_parse_bare_template() {
        let template = MessageTemplate::email("solo", "Solo", "S", "Body");
        let data = serde_json::to_vec(&template).unwrap();
        let parsed = parse_envelope(&data).unwrap();
        assert_eq!(parsed.templates, vec![template]);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let data = br#"{
            "export_info": {"version": "9.0", "exported_at": "2024-01-01T00:00:00Z"},
            "templates": []
        }"#;
        assert!(matches!(parse_envelope(data), Err(TemplateError::Import(_))));
        assert!(matches!(parse_envelope(b"[1, 2]"), Err(TemplateError::Import(_))));
    }
}
