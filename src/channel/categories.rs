//! Category registration table.
//!
//! Maps a message category to how it is presented as a notification. The
//! table is built once and shared read-only; both the per-category
//! notification path and the unknown-category fallback consult it.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::channel::proto::NotificationMessage;
use crate::notifications::Variant;

/// Category the channel uses for its own connection notifications.
pub const WS_CLIENT_ACTIVITY: &str = "WsClientActivity";

/// Turns a message into notification body text.
pub type BodyFn = fn(&NotificationMessage) -> String;

/// Presentation of one category.
#[derive(Clone, Copy)]
pub struct CategoryDescriptor {
    pub title: &'static str,
    pub body: Option<BodyFn>,
    pub variant: Variant,
    pub hidden: bool,
}

impl CategoryDescriptor {
    pub fn new(title: &'static str, body: BodyFn, variant: Variant) -> Self {
        Self {
            title,
            body: Some(body),
            variant,
            hidden: false,
        }
    }

    /// Registered category that raises no notification.
    pub fn silent(variant: Variant) -> Self {
        Self {
            title: "",
            body: None,
            variant,
            hidden: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Body text, when the descriptor is complete enough to notify.
    pub fn render(&self, message: &NotificationMessage) -> Option<String> {
        if self.title.is_empty() {
            return None;
        }
        self.body.map(|body| body(message))
    }
}

impl fmt::Debug for CategoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategoryDescriptor")
            .field("title", &self.title)
            .field("has_body", &self.body.is_some())
            .field("variant", &self.variant)
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// Immutable category table.
#[derive(Clone, Debug, Default)]
pub struct CategoryRegistry {
    entries: HashMap<String, CategoryDescriptor>,
}

impl CategoryRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds or replaces a category.
    pub fn with(mut self, category: impl Into<String>, descriptor: CategoryDescriptor) -> Self {
        self.entries.insert(category.into(), descriptor);
        self
    }

    pub fn get(&self, category: &str) -> Option<&CategoryDescriptor> {
        self.entries.get(category)
    }

    pub fn contains(&self, category: &str) -> bool {
        self.entries.contains_key(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Table of the categories the Cryostat server publishes.
    pub fn standard() -> Self {
        use Variant::{Info, Success};

        Self::empty()
            .with(
                WS_CLIENT_ACTIVITY,
                CategoryDescriptor::new("WebSocket Client Activity", client_activity, Info)
                    .hidden(),
            )
            .with(
                "TargetJvmDiscovery",
                CategoryDescriptor::new("Target JVM Discovery", jvm_discovery, Info).hidden(),
            )
            .with(
                "ActiveRecordingCreated",
                CategoryDescriptor::new("Recording Created", recording_created, Success),
            )
            .with(
                "ActiveRecordingStopped",
                CategoryDescriptor::new("Recording Stopped", recording_stopped, Success),
            )
            .with(
                "ActiveRecordingSaved",
                CategoryDescriptor::new("Recording Saved", recording_saved, Success),
            )
            .with(
                "ActiveRecordingDeleted",
                CategoryDescriptor::new("Recording Deleted", recording_deleted, Success),
            )
            .with(
                "SnapshotCreated",
                CategoryDescriptor::new("Snapshot Created", snapshot_created, Success),
            )
            .with(
                "SnapshotDeleted",
                CategoryDescriptor::new("Snapshot Deleted", recording_deleted, Success),
            )
            .with(
                "ArchivedRecordingCreated",
                CategoryDescriptor::new("Archived Recording Uploaded", archive_uploaded, Success),
            )
            .with(
                "ArchivedRecordingDeleted",
                CategoryDescriptor::new("Archived Recording Deleted", recording_deleted, Success),
            )
            .with(
                "RecordingMetadataUpdated",
                CategoryDescriptor::new("Recording Metadata Updated", metadata_updated, Success)
                    .hidden(),
            )
            .with(
                "TemplateUploaded",
                CategoryDescriptor::new("Template Created", template_created, Success),
            )
            .with(
                "TemplateDeleted",
                CategoryDescriptor::new("Template Deleted", template_deleted, Success),
            )
            .with(
                "ProbeTemplateUploaded",
                CategoryDescriptor::new("Probe Template Created", probe_template_created, Success),
            )
            .with(
                "ProbeTemplateApplied",
                CategoryDescriptor::new("Probe Template Applied", probe_template_applied, Success),
            )
            .with(
                "ProbeTemplateDeleted",
                CategoryDescriptor::new("Probe Template Deleted", probe_template_deleted, Success),
            )
            .with(
                "RuleCreated",
                CategoryDescriptor::new("Automated Rule Created", rule_created, Success),
            )
            .with(
                "RuleUpdated",
                CategoryDescriptor::new("Automated Rule Updated", rule_updated, Success),
            )
            .with(
                "RuleDeleted",
                CategoryDescriptor::new("Automated Rule Deleted", rule_deleted, Success),
            )
            .with(
                "CredentialsStored",
                CategoryDescriptor::new("Credentials Stored", credentials_stored, Success),
            )
            .with(
                "CredentialsDeleted",
                CategoryDescriptor::new("Credentials Deleted", credentials_deleted, Success),
            )
    }
}

fn client_activity(msg: &NotificationMessage) -> String {
    // Payload is a single `{ "<address>": "<status>" }` pair.
    match msg.message.as_object().and_then(|map| map.iter().next()) {
        Some((addr, status)) => {
            format!("Client at {addr} {}", status.as_str().unwrap_or("<unknown>"))
        }
        None => "Client activity".to_string(),
    }
}

fn jvm_discovery(msg: &NotificationMessage) -> String {
    let alias = msg.field("/event/serviceRef/alias");
    let url = msg.field("/event/serviceRef/connectUrl");
    let verb = match msg.message.pointer("/event/kind").and_then(Value::as_str) {
        Some("FOUND") => "appeared",
        Some("LOST") => "disappeared",
        _ => "was modified",
    };
    format!("Target \"{alias}\" {verb} ({url})")
}

fn recording_created(msg: &NotificationMessage) -> String {
    format!(
        "{} created in target: {}",
        msg.field("/recording/name"),
        msg.field("/target")
    )
}

fn recording_stopped(msg: &NotificationMessage) -> String {
    format!("{} was stopped", msg.field("/recording/name"))
}

fn recording_saved(msg: &NotificationMessage) -> String {
    format!("{} was archived", msg.field("/recording/name"))
}

fn recording_deleted(msg: &NotificationMessage) -> String {
    format!("{} was deleted", msg.field("/recording/name"))
}

fn snapshot_created(msg: &NotificationMessage) -> String {
    format!(
        "{} was created in target: {}",
        msg.field("/recording/name"),
        msg.field("/target")
    )
}

fn archive_uploaded(msg: &NotificationMessage) -> String {
    format!("{} was uploaded into archives", msg.field("/recording/name"))
}

fn metadata_updated(msg: &NotificationMessage) -> String {
    format!("{} metadata was updated", msg.field("/recordingName"))
}

fn template_created(msg: &NotificationMessage) -> String {
    format!("{} was created", msg.field("/template/name"))
}

fn template_deleted(msg: &NotificationMessage) -> String {
    format!("{} was deleted", msg.field("/template/name"))
}

fn probe_template_created(msg: &NotificationMessage) -> String {
    format!("{} was created", msg.field("/probeTemplate"))
}

fn probe_template_applied(msg: &NotificationMessage) -> String {
    format!(
        "{} was inserted into target: {}",
        msg.field("/probeTemplate"),
        msg.field("/targetId")
    )
}

fn probe_template_deleted(msg: &NotificationMessage) -> String {
    format!("{} was deleted", msg.field("/probeTemplate"))
}

fn rule_created(msg: &NotificationMessage) -> String {
    format!("{} was created", msg.field("/name"))
}

fn rule_updated(msg: &NotificationMessage) -> String {
    let state = match msg.message.get("enabled").and_then(Value::as_bool) {
        Some(true) => "enabled",
        Some(false) => "disabled",
        None => "updated",
    };
    format!("{} was {state}", msg.field("/name"))
}

fn rule_deleted(msg: &NotificationMessage) -> String {
    format!("{} was deleted", msg.field("/name"))
}

fn credentials_stored(msg: &NotificationMessage) -> String {
    format!("Credentials stored for: {}", msg.field("/matchExpression"))
}

fn credentials_deleted(msg: &NotificationMessage) -> String {
    format!("Credentials deleted for: {}", msg.field("/matchExpression"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CategoryDescriptor, CategoryRegistry, WS_CLIENT_ACTIVITY};
    use crate::channel::proto::NotificationMessage;
    use crate::notifications::Variant;

    fn render(category: &str, payload: serde_json::Value) -> Option<String> {
        let registry = CategoryRegistry::standard();
        let message = NotificationMessage::new(category, payload);
        registry.get(category)?.render(&message)
    }

    #[test]
    fn client_activity_renders_address_and_status() {
        assert_eq!(
            render(WS_CLIENT_ACTIVITY, json!({"127.0.0.1:5432": "connected"})).as_deref(),
            Some("Client at 127.0.0.1:5432 connected")
        );
        let descriptor = CategoryRegistry::standard()
            .get(WS_CLIENT_ACTIVITY)
            .copied()
            .expect("registered");
        assert!(descriptor.hidden);
        assert_eq!(descriptor.variant, Variant::Info);
    }

    #[test]
    fn discovery_reports_found_and_lost() {
        let found = json!({"event": {"kind": "FOUND", "serviceRef": {"alias": "app", "connectUrl": "svc:jmx"}}});
        assert_eq!(
            render("TargetJvmDiscovery", found).as_deref(),
            Some("Target \"app\" appeared (svc:jmx)")
        );
        let lost = json!({"event": {"kind": "LOST", "serviceRef": {"alias": "app", "connectUrl": "svc:jmx"}}});
        assert_eq!(
            render("TargetJvmDiscovery", lost).as_deref(),
            Some("Target \"app\" disappeared (svc:jmx)")
        );
    }

    #[test]
    fn recording_and_rule_bodies() {
        assert_eq!(
            render(
                "ActiveRecordingCreated",
                json!({"recording": {"name": "r1"}, "target": "svc:jmx"})
            )
            .as_deref(),
            Some("r1 created in target: svc:jmx")
        );
        assert_eq!(
            render("RuleUpdated", json!({"name": "rule", "enabled": false})).as_deref(),
            Some("rule was disabled")
        );
        assert_eq!(
            render("ActiveRecordingStopped", json!({})).as_deref(),
            Some("<unknown> was stopped")
        );
    }

    #[test]
    fn silent_descriptor_never_renders() {
        let registry = CategoryRegistry::empty().with("Quiet", CategoryDescriptor::silent(Variant::Info));
        let message = NotificationMessage::new("Quiet", json!({}));
        assert!(registry.contains("Quiet"));
        assert_eq!(registry.get("Quiet").and_then(|d| d.render(&message)), None);
    }

    #[test]
    fn unknown_category_is_absent() {
        let registry = CategoryRegistry::standard();
        assert!(!registry.contains("SomethingNew"));
        assert!(registry.len() > 10);
        assert!(registry.categories().any(|c| c == "RuleDeleted"));
    }
}
