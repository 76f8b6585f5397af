//! Analytics records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of event stored in `email_events`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Template rendered or picked for a send
    TemplateUsed,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Failed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TemplateUsed => "template_used",
            EventType::Sent => "sent",
            EventType::Delivered => "delivered",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "template_used" => Some(EventType::TemplateUsed),
            "sent" => Some(EventType::Sent),
            "delivered" => Some(EventType::Delivered),
            "opened" => Some(EventType::Opened),
            "clicked" => Some(EventType::Clicked),
            "failed" => Some(EventType::Failed),
            _ => None,
        }
    }
}

/// Delivery state of one campaign message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Opened => "opened",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "opened" => MessageStatus::Opened,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Pending,
        }
    }

    /// Whether the message left the sender
    pub fn is_sent(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Opened
        )
    }
}

/// Stored event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: String,
    pub template_id: Option<String>,
    pub campaign_id: Option<String>,
    pub event_type: EventType,
    pub channel: Option<String>,
    pub recipient: Option<String>,
    /// JSON object with caller-supplied details
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Stored campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailCampaign {
    pub id: String,
    pub name: String,
    pub template_id: Option<String>,
    pub channel: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Stored campaign message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub campaign_id: String,
    pub recipient: String,
    pub status: MessageStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated events of one template
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateUsageStats {
    pub template_id: String,
    pub total_events: u64,
    pub usage_count: u64,
    pub sent: u64,
    pub failed: u64,
    pub opened: u64,
    pub last_used: Option<DateTime<Utc>>,
    /// Usage events per channel
    pub by_channel: BTreeMap<String, u64>,
}

/// Delivery summary of one campaign
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignPerformance {
    pub campaign_id: String,
    pub name: String,
    pub total_messages: u64,
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub failed: u64,
    pub pending: u64,
    /// Sent share of all messages, 0.0 for an empty campaign
    pub success_rate: f64,
}

/// Template ranked by usage events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateRanking {
    pub template_id: String,
    pub usage_count: u64,
}

/// Analytics section of a bulk export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsExport {
    #[serde(default)]
    pub template_stats: BTreeMap<String, u64>,
}
