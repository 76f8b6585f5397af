//! Invariant checks for templates and categories

use crate::error::{Result, TemplateError};
use crate::templates::types::{Channel, MessageTemplate, TemplateCategory};
use std::collections::HashMap;

pub(crate) const MAX_ID_LEN: usize = 128;

/// Ids double as file names, so only a conservative character set is allowed
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(TemplateError::validation(format!("{} id must not be empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(TemplateError::validation(format!(
            "{} id longer than {} characters: {}",
            kind, MAX_ID_LEN, id
        )));
    }
    if id.starts_with('.') {
        return Err(TemplateError::validation(format!(
            "{} id must not start with '.': {}",
            kind, id
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(TemplateError::validation(format!(
            "{} id may only contain letters, digits, '_', '-' and '.': {}",
            kind, id
        )));
    }
    Ok(())
}

/// Check the MessageTemplate invariants
pub fn validate_template(template: &MessageTemplate) -> Result<()> {
    validate_id("Template", &template.id)?;

    if template.name.trim().is_empty() {
        return Err(TemplateError::validation(format!(
            "Template {} has no name",
            template.id
        )));
    }

    if template.channels.is_empty() {
        return Err(TemplateError::validation(format!(
            "Template {} must target at least one channel",
            template.id
        )));
    }

    for channel in &template.channels {
        let body = match channel {
            Channel::Email => &template.content,
            Channel::WhatsApp => &template.whatsapp_content,
        };
        if body.trim().is_empty() {
            return Err(TemplateError::validation(format!(
                "Template {} targets {} but has no {} content",
                template.id, channel, channel
            )));
        }
    }

    if template.updated_at < template.created_at {
        return Err(TemplateError::validation(format!(
            "Template {} was updated before it was created",
            template.id
        )));
    }

    Ok(())
}

/// Reject a parent assignment that would point at a missing category or close a cycle
pub fn validate_category_parent(
    category_id: &str,
    parent_id: Option<&str>,
    categories: &HashMap<String, TemplateCategory>,
) -> Result<()> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };

    if parent_id == category_id {
        return Err(TemplateError::validation(format!(
            "Category {} cannot be its own parent",
            category_id
        )));
    }

    let mut current = Some(parent_id.to_string());
    let mut steps = 0usize;
    while let Some(id) = current {
        let parent = categories.get(&id).ok_or_else(|| {
            TemplateError::validation(format!("Parent category not found: {}", id))
        })?;

        if parent.id == category_id {
            return Err(TemplateError::validation(format!(
                "Circular category hierarchy: {} is an ancestor of {}",
                category_id, parent_id
            )));
        }

        steps += 1;
        if steps > categories.len() {
            return Err(TemplateError::validation(format!(
                "Circular category hierarchy above {}",
                parent_id
            )));
        }

        current = parent.parent_id.clone();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn categories(pairs: &[(&str, Option<&str>)]) -> HashMap<String, TemplateCategory> {
        pairs
            .iter()
            .map(|(id, parent)| {
                let mut category = TemplateCategory::new(*id, *id);
                category.parent_id = parent.map(|p| p.to_string());
                (id.to_string(), category)
            })
            .collect()
    }

    #[test]
    fn test_valid_email_template() {
        let template = MessageTemplate::email("t1", "Welcome", "Hi {name}", "Hello {name}");
        assert!(validate_template(&template).is_ok());
    }

    #[test]
    fn test_channel_without_content_is_rejected() {
        let mut template = MessageTemplate::email("t1", "Welcome", "Hi", "Hello");
        template.channels.insert(Channel::WhatsApp);
        let err = validate_template(&template).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("whatsapp"));
    }

    #[test]
    fn test_no_channels_is_rejected() {
        let mut template = MessageTemplate::email("t1", "Welcome", "Hi", "Hello");
        template.channels = BTreeSet::new();
        assert!(validate_template(&template).is_err());
    }

    #[test]
    fn test_unsafe_ids_are_rejected() {
        assert!(validate_id("Template", "../etc/passwd").is_err());
        assert!(validate_id("Template", ".hidden").is_err());
        assert!(validate_id("Template", "").is_err());
        assert!(validate_id("Template", "promo_2024-v1.b").is_ok());
    }

    #[test]
    fn test_category_cycle_detection() {
        let cats = categories(&[("a", None), ("b", Some("a")), ("c", Some("b"))]);

        // a -> c would make c an ancestor of itself through b
        assert!(validate_category_parent("a", Some("c"), &cats).is_err());
        assert!(validate_category_parent("a", Some("a"), &cats).is_err());
        assert!(validate_category_parent("c", Some("a"), &cats).is_ok());
        assert!(validate_category_parent("c", Some("missing"), &cats).is_err());
        assert!(validate_category_parent("c", None, &cats).is_ok());
    }
}
