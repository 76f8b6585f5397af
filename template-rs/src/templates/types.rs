//! Template types and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Category every template falls back to
pub const DEFAULT_CATEGORY_ID: &str = "general";

/// Delivery channel a template can be sent through
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    #[serde(alias = "whats_app")]
    WhatsApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Some(Channel::Email),
            "whatsapp" | "whats_app" => Some(Channel::WhatsApp),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reusable email/WhatsApp message with `{placeholder}` variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Unique identifier, also the file name on disk
    pub id: String,
    pub name: String,
    pub channels: BTreeSet<Channel>,
    /// Email subject line
    #[serde(default)]
    pub subject: String,
    /// Email body
    #[serde(default)]
    pub content: String,
    /// WhatsApp message body
    #[serde(default)]
    pub whatsapp_content: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Placeholder names in first-use order
    #[serde(default)]
    pub variables: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_language() -> String {
    "en".to_string()
}

impl MessageTemplate {
    /// Email-only template
    pub fn email(
        id: impl Into<String>,
        name: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            channels: BTreeSet::from([Channel::Email]),
            subject: subject.into(),
            content: content.into(),
            whatsapp_content: String::new(),
            language: default_language(),
            variables: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// WhatsApp-only template
    pub fn whatsapp(
        id: impl Into<String>,
        name: impl Into<String>,
        whatsapp_content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            channels: BTreeSet::from([Channel::WhatsApp]),
            subject: String::new(),
            content: String::new(),
            whatsapp_content: whatsapp_content.into(),
            language: default_language(),
            variables: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }

    /// True when both templates carry the same message content, ignoring id and timestamps
    pub fn same_content(&self, other: &MessageTemplate) -> bool {
        self.name == other.name
            && self.channels == other.channels
            && self.subject == other.subject
            && self.content == other.content
            && self.whatsapp_content == other.whatsapp_content
            && self.language == other.language
            && self.variables == other.variables
    }
}

/// Hierarchical grouping of templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    /// Cached count, refreshed by `update_category_counts`
    #[serde(default)]
    pub template_count: usize,
    /// Cached usage total, refreshed by `update_category_counts`
    #[serde(default)]
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

fn default_color() -> String {
    "#6c757d".to_string()
}

impl TemplateCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            color: default_color(),
            parent_id: None,
            sort_order: 0,
            template_count: 0,
            usage_count: 0,
            created_at: Utc::now(),
        }
    }

    /// The built-in fallback category
    pub fn general() -> Self {
        let mut category = Self::new(DEFAULT_CATEGORY_ID, "General");
        category.description = "Uncategorized templates".to_string();
        category
    }
}

/// Per-template bookkeeping stored in `index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub category_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for TemplateMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            description: String::new(),
            tags: BTreeSet::new(),
            usage_count: 0,
            current_version: None,
            last_used: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Optional metadata and version details supplied with `save_template`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveOptions {
    pub category_id: Option<String>,
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub author: Option<String>,
    pub message: Option<String>,
}

impl SaveOptions {
    pub fn in_category(category_id: impl Into<String>) -> Self {
        Self {
            category_id: Some(category_id.into()),
            ..Default::default()
        }
    }
}

/// Partial update of an existing template
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub channels: Option<BTreeSet<Channel>>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub whatsapp_content: Option<String>,
    pub language: Option<String>,
    pub variables: Option<Vec<String>>,
    pub message: Option<String>,
}

impl UpdateTemplateRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.channels.is_none()
            && self.subject.is_none()
            && self.content.is_none()
            && self.whatsapp_content.is_none()
            && self.language.is_none()
            && self.variables.is_none()
    }

    /// Apply the populated fields to `template`
    pub fn apply(&self, template: &mut MessageTemplate) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }
        if let Some(channels) = &self.channels {
            template.channels = channels.clone();
        }
        if let Some(subject) = &self.subject {
            template.subject = subject.clone();
        }
        if let Some(content) = &self.content {
            template.content = content.clone();
        }
        if let Some(whatsapp_content) = &self.whatsapp_content {
            template.whatsapp_content = whatsapp_content.clone();
        }
        if let Some(language) = &self.language {
            template.language = language.clone();
        }
        if let Some(variables) = &self.variables {
            template.variables = variables.clone();
        }
    }
}

/// Request to create a category
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCategoryRequest {
    /// Explicit id; derived from the name when absent
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent_id: Option<String>,
    pub sort_order: Option<i32>,
}

/// Request to update a category
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    /// `Some(None)` moves the category to the top level
    pub parent_id: Option<Option<String>>,
    pub sort_order: Option<i32>,
}

/// Category with its children, for tree views
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    pub category: TemplateCategory,
    pub children: Vec<CategoryNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serializes_lowercase() {
        let json = serde_json::to_string(&Channel::WhatsApp).unwrap();
        assert_eq!(json, "\"whatsapp\"");
        let parsed: Channel = serde_json::from_str("\"email\"").unwrap();
        assert_eq!(parsed, Channel::Email);
        assert_eq!(Channel::parse("WhatsApp"), Some(Channel::WhatsApp));
        assert_eq!(Channel::parse("sms"), None);
    }

    #[test]
    fn test_template_json_keys() {
        let template = MessageTemplate::email("t1", "Welcome", "Hi {name}", "Hello {name}");
        let value = serde_json::to_value(&template).unwrap();
        for key in [
            "id",
            "name",
            "channels",
            "subject",
            "content",
            "whatsapp_content",
            "language",
            "variables",
            "created_at",
            "updated_at",
        ] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(value["channels"], serde_json::json!(["email"]));
    }

    #[test]
    fn test_update_request_apply() {
        let mut template = MessageTemplate::email("t1", "Welcome", "Hi", "Hello");
        let request = UpdateTemplateRequest {
            subject: Some("Hi again".to_string()),
            ..Default::default()
        };
        assert!(!request.is_empty());
        request.apply(&mut template);
        assert_eq!(template.subject, "Hi again");
        assert_eq!(template.content, "Hello");
    }
}
