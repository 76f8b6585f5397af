//! SQLite analytics store
//!
//! Records template usage events, campaigns and per-recipient campaign
//! messages. Independent of the JSON stores; losing the database only loses
//! statistics.

use crate::error::{Result, TemplateError};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::*;

/// Fixed-width UTC timestamps so text comparison orders them
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TemplateError::Storage(format!("Invalid timestamp {:?}: {}", s, e)))
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

/// Analytics store over a SQLite pool
#[derive(Clone)]
pub struct AnalyticsStore {
    db: SqlitePool,
}

impl AnalyticsStore {
    /// Wrap an existing pool
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (creating if missing) the database at `url` and initialise tables
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_db().await?;
        info!("Analytics database ready at {}", url);
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                template_id TEXT,
                channel TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_messages (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES email_campaigns(id) ON DELETE CASCADE,
                recipient TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_events (
                id TEXT PRIMARY KEY,
                template_id TEXT,
                campaign_id TEXT REFERENCES email_campaigns(id) ON DELETE SET NULL,
                event_type TEXT NOT NULL,
                channel TEXT,
                recipient TEXT,
                details TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_email_events_template ON email_events(template_id)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_email_messages_campaign ON email_messages(campaign_id)",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Store one event and return its id
    pub async fn record_event(
        &self,
        event_type: EventType,
        template_id: Option<&str>,
        campaign_id: Option<&str>,
        channel: Option<&str>,
        recipient: Option<&str>,
        details: &serde_json::Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let details = serde_json::to_string(details)?;

        sqlx::query(
            r#"
            INSERT INTO email_events
                (id, template_id, campaign_id, event_type, channel, recipient, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(template_id)
        .bind(campaign_id)
        .bind(event_type.as_str())
        .bind(channel)
        .bind(recipient)
        .bind(&details)
        .bind(timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        debug!("Recorded {} event {}", event_type.as_str(), id);
        Ok(id)
    }

    /// Store a template usage event
    pub async fn record_template_usage(
        &self,
        template_id: &str,
        channel: Option<&str>,
        details: &serde_json::Value,
    ) -> Result<String> {
        self.record_event(
            EventType::TemplateUsed,
            Some(template_id),
            None,
            channel,
            None,
            details,
        )
        .await
    }

    /// Events of a template, newest first
    pub async fn template_events(
        &self,
        template_id: &str,
        limit: u32,
    ) -> Result<Vec<EmailEvent>> {
        let rows = sqlx::query_as::<
            _,
            (
                String,
                Option<String>,
                Option<String>,
                String,
                Option<String>,
                Option<String>,
                Option<String>,
                String,
            ),
        >(
            r#"
            SELECT id, template_id, campaign_id, event_type, channel, recipient, details, created_at
            FROM email_events
            WHERE template_id = ?
            ORDER BY created_at DESC, id
            LIMIT ?
            "#,
        )
        .bind(template_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, template_id, campaign_id, event_type, channel, recipient, details, created_at) in
            rows
        {
            let Some(event_type) = EventType::parse(&event_type) else {
                debug!("Skipping event {} with unknown type {}", id, event_type);
                continue;
            };
            let details = match details {
                Some(text) => serde_json::from_str(&text)?,
                None => serde_json::Value::Null,
            };
            events.push(EmailEvent {
                id,
                template_id,
                campaign_id,
                event_type,
                channel,
                recipient,
                details,
                created_at: parse_timestamp(&created_at)?,
            });
        }

        Ok(events)
    }

    /// Aggregate the events of a template
    pub async fn template_stats(&self, template_id: &str) -> Result<TemplateUsageStats> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT event_type, COUNT(*) FROM email_events
            WHERE template_id = ?
            GROUP BY event_type
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.db)
        .await?;

        let mut stats = TemplateUsageStats {
            template_id: template_id.to_string(),
            ..Default::default()
        };

        for (event_type, count) in rows {
            let count = count as u64;
            stats.total_events += count;
            match EventType::parse(&event_type) {
                Some(EventType::TemplateUsed) => stats.usage_count += count,
                Some(EventType::Sent) | Some(EventType::Delivered) => stats.sent += count,
                Some(EventType::Opened) | Some(EventType::Clicked) => stats.opened += count,
                Some(EventType::Failed) => stats.failed += count,
                None => {}
            }
        }

        let channels = sqlx::query_as::<_, (Option<String>, i64)>(
            r#"
            SELECT channel, COUNT(*) FROM email_events
            WHERE template_id = ? AND event_type = 'template_used'
            GROUP BY channel
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.db)
        .await?;

        for (channel, count) in channels {
            let key = channel.unwrap_or_else(|| "unknown".to_string());
            stats.by_channel.insert(key, count as u64);
        }

        let last_used = sqlx::query_as::<_, (Option<String>,)>(
            r#"
            SELECT MAX(created_at) FROM email_events
            WHERE template_id = ? AND event_type = 'template_used'
            "#,
        )
        .bind(template_id)
        .fetch_one(&self.db)
        .await?;
        stats.last_used = parse_optional_timestamp(last_used.0)?;

        Ok(stats)
    }

    /// Most used templates
    pub async fn top_templates(&self, limit: u32) -> Result<Vec<TemplateRanking>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT template_id, COUNT(*) AS uses FROM email_events
            WHERE template_id IS NOT NULL AND event_type = 'template_used'
            GROUP BY template_id
            ORDER BY uses DESC, template_id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(template_id, uses)| TemplateRanking {
                template_id,
                usage_count: uses as u64,
            })
            .collect())
    }

    /// Create a campaign and return its id
    pub async fn create_campaign(
        &self,
        name: &str,
        template_id: Option<&str>,
        channel: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO email_campaigns (id, name, template_id, channel, status, created_at)
            VALUES (?, ?, ?, ?, 'draft', ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(template_id)
        .bind(channel)
        .bind(timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        info!("Created campaign {} ({})", name, id);
        Ok(id)
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Option<EmailCampaign>> {
        let row = sqlx::query_as::<
            _,
            (String, String, Option<String>, String, String, String, Option<String>),
        >(
            r#"
            SELECT id, name, template_id, channel, status, created_at, completed_at
            FROM email_campaigns WHERE id = ?
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(campaign_from_row).transpose()
    }

    /// All campaigns, newest first
    pub async fn list_campaigns(&self) -> Result<Vec<EmailCampaign>> {
        let rows = sqlx::query_as::<
            _,
            (String, String, Option<String>, String, String, String, Option<String>),
        >(
            r#"
            SELECT id, name, template_id, channel, status, created_at, completed_at
            FROM email_campaigns ORDER BY created_at DESC, id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(campaign_from_row).collect()
    }

    /// Mark a campaign finished
    pub async fn complete_campaign(&self, campaign_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE email_campaigns SET status = 'completed', completed_at = ? WHERE id = ?",
        )
        .bind(timestamp(Utc::now()))
        .bind(campaign_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Add a pending message to a campaign
    pub async fn add_message(&self, campaign_id: &str, recipient: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO email_messages (id, campaign_id, recipient, status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(campaign_id)
        .bind(recipient)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        Ok(id)
    }

    /// Move a message to a new delivery state
    pub async fn update_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE email_messages SET status = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(timestamp(Utc::now()))
        .bind(message_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn campaign_messages(&self, campaign_id: &str) -> Result<Vec<EmailMessage>> {
        let rows = sqlx::query_as::<
            _,
            (String, String, String, String, Option<String>, String, String),
        >(
            r#"
            SELECT id, campaign_id, recipient, status, error, created_at, updated_at
            FROM email_messages WHERE campaign_id = ? ORDER BY created_at, id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(
                |(id, campaign_id, recipient, status, error, created_at, updated_at)| {
                    Ok(EmailMessage {
                        id,
                        campaign_id,
                        recipient,
                        status: MessageStatus::parse(&status),
                        error,
                        created_at: parse_timestamp(&created_at)?,
                        updated_at: parse_timestamp(&updated_at)?,
                    })
                },
            )
            .collect()
    }

    /// Delivery summary of a campaign
    pub async fn campaign_performance(
        &self,
        campaign_id: &str,
    ) -> Result<Option<CampaignPerformance>> {
        let Some(campaign) = self.get_campaign(campaign_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM email_messages WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.db)
        .await?;

        let mut perf = CampaignPerformance {
            campaign_id: campaign.id,
            name: campaign.name,
            total_messages: 0,
            sent: 0,
            delivered: 0,
            opened: 0,
            failed: 0,
            pending: 0,
            success_rate: 0.0,
        };

        for (status, count) in rows {
            let count = count as u64;
            let status = MessageStatus::parse(&status);
            perf.total_messages += count;
            if status.is_sent() {
                perf.sent += count;
            }
            match status {
                MessageStatus::Delivered => perf.delivered += count,
                MessageStatus::Opened => {
                    perf.delivered += count;
                    perf.opened += count;
                }
                MessageStatus::Failed => perf.failed += count,
                MessageStatus::Pending => perf.pending += count,
                MessageStatus::Sent => {}
            }
        }

        if perf.total_messages > 0 {
            perf.success_rate = perf.sent as f64 / perf.total_messages as f64;
        }

        Ok(Some(perf))
    }

    /// Delete events older than `days` days
    pub async fn cleanup_old_events(&self, days: i64) -> Result<u64> {
        let cutoff = Duration::try_days(days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .map(timestamp)
            .ok_or_else(|| {
                TemplateError::validation(format!("Retention window out of range: {} days", days))
            })?;

        let result = sqlx::query("DELETE FROM email_events WHERE created_at < ?")
            .bind(&cutoff)
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!("Removed {} analytics events older than {} days", removed, days);
        }
        Ok(removed)
    }

    /// Usage counts per template for bulk exports
    pub async fn export_usage(&self) -> Result<AnalyticsExport> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT template_id, COUNT(*) FROM email_events
            WHERE template_id IS NOT NULL AND event_type = 'template_used'
            GROUP BY template_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(AnalyticsExport {
            template_stats: rows
                .into_iter()
                .map(|(id, count)| (id, count as u64))
                .collect(),
        })
    }
}

fn campaign_from_row(
    (id, name, template_id, channel, status, created_at, completed_at): (
        String,
        String,
        Option<String>,
        String,
        String,
        String,
        Option<String>,
    ),
) -> Result<EmailCampaign> {
    Ok(EmailCampaign {
        id,
        name,
        template_id,
        channel,
        status,
        created_at: parse_timestamp(&created_at)?,
        completed_at: parse_optional_timestamp(completed_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store() -> AnalyticsStore {
        AnalyticsStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_template_usage_stats() {
        let store = memory_store().await;
        store
            .record_template_usage("t1", Some("email"), &json!({"recipients": 3}))
            .await
            .unwrap();
        store
            .record_template_usage("t1", Some("whatsapp"), &json!({}))
            .await
            .unwrap();
        store
            .record_event(
                EventType::Failed,
                Some("t1"),
                None,
                Some("email"),
                Some("a@b.c"),
                &json!({}),
            )
            .await
            .unwrap();

        let stats = store.template_stats("t1").await.unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.usage_count, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_channel.get("email"), Some(&1));
        assert!(stats.last_used.is_some());

        let empty = store.template_stats("missing").await.unwrap();
        assert_eq!(empty.total_events, 0);
        assert!(empty.last_used.is_none());
    }

    #[tokio::test]
    async fn test_campaign_performance() {
        let store = memory_store().await;
        let campaign = store
            .create_campaign("Spring", Some("t1"), "email")
            .await
            .unwrap();

        let m1 = store.add_message(&campaign, "a@example.com").await.unwrap();
        let m2 = store.add_message(&campaign, "b@example.com").await.unwrap();
        store.add_message(&campaign, "c@example.com").await.unwrap();
        let m4 = store.add_message(&campaign, "d@example.com").await.unwrap();

        store
            .update_message_status(&m1, MessageStatus::Sent, None)
            .await
            .unwrap();
        store
            .update_message_status(&m2, MessageStatus::Opened, None)
            .await
            .unwrap();
        store
            .update_message_status(&m4, MessageStatus::Failed, Some("mailbox full"))
            .await
            .unwrap();

        let perf = store.campaign_performance(&campaign).await.unwrap().unwrap();
        assert_eq!(perf.total_messages, 4);
        assert_eq!(perf.sent, 2);
        assert_eq!(perf.opened, 1);
        assert_eq!(perf.failed, 1);
        assert_eq!(perf.pending, 1);
        assert!((perf.success_rate - 0.5).abs() < 1e-9);

        assert!(store.campaign_performance("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_requires_campaign() {
        let store = memory_store().await;
        assert!(store.add_message("missing", "a@example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_top_templates_and_cleanup() {
        let store = memory_store().await;
        for _ in 0..3 {
            store.record_template_usage("busy", None, &json!({})).await.unwrap();
        }
        store.record_template_usage("quiet", None, &json!({})).await.unwrap();

        let top = store.top_templates(10).await.unwrap();
        assert_eq!(top[0].template_id, "busy");
        assert_eq!(top[0].usage_count, 3);
        assert_eq!(top.len(), 2);

        // Nothing is older than a day yet
        assert_eq!(store.cleanup_old_events(1).await.unwrap(), 0);
        // A negative window puts the cutoff in the future
        assert_eq!(store.cleanup_old_events(-1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_cleanup_rejects_out_of_range_window() {
        let store = memory_store().await;
        store.record_template_usage("t1", None, &json!({})).await.unwrap();

        let err = store.cleanup_old_events(i64::MAX).await.unwrap_err();
        assert!(err.is_validation());
        assert!(store.cleanup_old_events(i64::MIN).await.is_err());
        assert_eq!(store.template_stats("t1").await.unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn test_template_events_newest_first() {
        let store = memory_store().await;
        let first = store
            .record_template_usage("t1", Some("email"), &json!({"recipients": 3}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store
            .record_event(
                EventType::Opened,
                Some("t1"),
                None,
                Some("email"),
                Some("a@example.com"),
                &json!({"client": "webmail"}),
            )
            .await
            .unwrap();
        store.record_template_usage("t2", None, &json!({})).await.unwrap();

        let events = store.template_events("t1", 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, second);
        assert_eq!(events[0].event_type, EventType::Opened);
        assert_eq!(events[0].recipient.as_deref(), Some("a@example.com"));
        assert_eq!(events[0].details["client"], "webmail");
        assert_eq!(events[1].id, first);
        assert_eq!(events[1].event_type, EventType::TemplateUsed);
        assert_eq!(events[1].details, json!({"recipients": 3}));
        assert!(events[0].created_at >= events[1].created_at);

        assert_eq!(store.template_events("t1", 1).await.unwrap().len(), 1);
        assert!(store.template_events("none", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_complete_campaigns() {
        let store = memory_store().await;
        let older = store.create_campaign("Winter", None, "whatsapp").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let newer = store
            .create_campaign("Spring", Some("t1"), "email")
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_campaigns()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![newer.clone(), older.clone()]);

        let draft = store.get_campaign(&older).await.unwrap().unwrap();
        assert_eq!(draft.status, "draft");
        assert!(draft.completed_at.is_none());

        assert!(store.complete_campaign(&older).await.unwrap());
        assert!(!store.complete_campaign("missing").await.unwrap());

        let done = store.get_campaign(&older).await.unwrap().unwrap();
        assert_eq!(done.status, "completed");
        let completed_at = done.completed_at.unwrap();
        assert!(completed_at >= done.created_at);
        assert_eq!(store.get_campaign(&newer).await.unwrap().unwrap().status, "draft");
    }

    #[tokio::test]
    async fn test_campaign_messages_cascade_on_delete() {
        let store = memory_store().await;
        let campaign = store.create_campaign("Spring", None, "email").await.unwrap();
        let other = store.create_campaign("Other", None, "email").await.unwrap();

        let first = store.add_message(&campaign, "a@example.com").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.add_message(&campaign, "b@example.com").await.unwrap();
        store.add_message(&other, "c@example.com").await.unwrap();
        store
            .update_message_status(&second, MessageStatus::Failed, Some("bounced"))
            .await
            .unwrap();

        let messages = store.campaign_messages(&campaign).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
        assert_eq!(messages[0].status, MessageStatus::Pending);
        assert_eq!(messages[1].status, MessageStatus::Failed);
        assert_eq!(messages[1].error.as_deref(), Some("bounced"));

        sqlx::query("DELETE FROM email_campaigns WHERE id = ?")
            .bind(&campaign)
            .execute(&store.db)
            .await
            .unwrap();

        assert!(store.campaign_messages(&campaign).await.unwrap().is_empty());
        assert_eq!(store.campaign_messages(&other).await.unwrap().len(), 1);
    }
}
