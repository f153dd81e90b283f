//! # Event Dispatcher
//!
//! Maps an incoming [`EventEnvelope`] to the cache keys it invalidates and to
//! the diagnostic update the channel should record.
//!
//! ## Dispatch Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dispatch Rules                                   │
//! │                                                                         │
//! │  chore.created / updated / completed / skipped                         │
//! │    → chores  (+ chore:<id>, choreDetails:<id> when id present)         │
//! │                                                                         │
//! │  chore.deleted                                                         │
//! │    → chores  (+ chore:<id>, choreDetails:<id> when id present)         │
//! │                                                                         │
//! │  subtask.updated / completed                                           │
//! │    → chores  (+ chore:<owner>, choreDetails:<owner> when owner known)  │
//! │                                                                         │
//! │  heartbeat               → ∅, diagnostic: heartbeat seen               │
//! │  connection.established  → ∅, diagnostic: clear last error             │
//! │  error                   → ∅, diagnostic: record message               │
//! │  anything else           → ∅, diagnostic: unknown event                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The table is data: resources and sub-resources are registered through
//! [`ResourceSpec`] / [`SubResourceSpec`]. The default registry knows about
//! chores and their checklist subtasks.

use serde_json::Value;

use crate::envelope::{EventEnvelope, EventKind, MutationAction};
use crate::invalidation::{CacheKey, InvalidationSet};

/// Fallback message when an `error` envelope carries no text.
const GENERIC_SERVER_ERROR: &str = "Server reported an error";

// =============================================================================
// Registry
// =============================================================================

/// A top-level resource whose mutations are pushed over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Name used in envelope types (`chore` in `chore.created`).
    pub name: String,
    /// Collection key (`chores`).
    pub collection: String,
    /// Item key prefix (`chore` → `chore:<id>`).
    pub item_prefix: String,
    /// Detail key prefix (`choreDetails` → `choreDetails:<id>`).
    pub detail_prefix: String,
}

impl ResourceSpec {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        item_prefix: impl Into<String>,
        detail_prefix: impl Into<String>,
    ) -> Self {
        ResourceSpec {
            name: name.into(),
            collection: collection.into(),
            item_prefix: item_prefix.into(),
            detail_prefix: detail_prefix.into(),
        }
    }

    /// The chore resource.
    pub fn chore() -> Self {
        Self::new("chore", "chores", "chore", "choreDetails")
    }

    pub fn collection_key(&self) -> CacheKey {
        CacheKey::Collection(self.collection.clone())
    }

    pub fn item_key(&self, id: &str) -> CacheKey {
        CacheKey::Item(format!("{}:{}", self.item_prefix, id))
    }

    pub fn detail_key(&self, id: &str) -> CacheKey {
        CacheKey::Detail(format!("{}:{}", self.detail_prefix, id))
    }

    /// Reads the resource id from `data.<name>.id`, `data.<name>Id` or `data.id`.
    fn id_in(&self, data: &Value) -> Option<String> {
        data.get(&self.name)
            .and_then(|nested| nested.get("id"))
            .and_then(id_value)
            .or_else(|| data.get(format!("{}Id", self.name)).and_then(id_value))
            .or_else(|| data.get("id").and_then(id_value))
    }
}

/// A resource nested under an owning [`ResourceSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResourceSpec {
    /// Name used in envelope types (`subtask` in `subtask.completed`).
    pub name: String,
    /// Name of the owning resource (`chore`).
    pub owner: String,
}

impl SubResourceSpec {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        SubResourceSpec {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// Checklist items belonging to a chore.
    pub fn subtask() -> Self {
        Self::new("subtask", "chore")
    }

    /// Reads the owner id from `data.<name>.<owner>Id`, `data.<owner>Id` or
    /// `data.<owner>.id`.
    fn owner_id_in(&self, data: &Value) -> Option<String> {
        let owner_field = format!("{}Id", self.owner);
        data.get(&self.name)
            .and_then(|nested| nested.get(&owner_field))
            .and_then(id_value)
            .or_else(|| data.get(&owner_field).and_then(id_value))
            .or_else(|| {
                data.get(&self.owner)
                    .and_then(|owner| owner.get("id"))
                    .and_then(id_value)
            })
    }
}

fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

// =============================================================================
// Dispatch Result
// =============================================================================

/// Diagnostic side effect of one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticUpdate {
    /// Nothing beyond "last event" bookkeeping.
    None,
    /// A server heartbeat was observed.
    HeartbeatSeen,
    /// The channel (re)opened; any previous error is resolved.
    ClearLastError,
    /// Server-reported error text to surface to the consumer.
    RecordError(String),
    /// Type not in the dispatch table.
    UnknownEvent(String),
}

/// Everything the channel needs to act on for one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub invalidations: InvalidationSet,
    pub diagnostic: DiagnosticUpdate,
}

impl Dispatch {
    fn diagnostic_only(diagnostic: DiagnosticUpdate) -> Self {
        Dispatch {
            invalidations: InvalidationSet::new(),
            diagnostic,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Declarative envelope → invalidation table.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    resources: Vec<ResourceSpec>,
    subresources: Vec<SubResourceSpec>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        EventDispatcher::empty()
            .with_resource(ResourceSpec::chore())
            .with_subresource(SubResourceSpec::subtask())
    }
}

impl EventDispatcher {
    /// A dispatcher with no registered resources.
    pub fn empty() -> Self {
        EventDispatcher {
            resources: Vec::new(),
            subresources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }

    /// Registers a sub-resource. Its owner should be registered as a resource;
    /// otherwise its events are treated as unknown.
    pub fn with_subresource(mut self, subresource: SubResourceSpec) -> Self {
        self.subresources.push(subresource);
        self
    }

    fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.name == name)
    }

    fn subresource(&self, name: &str) -> Option<&SubResourceSpec> {
        self.subresources.iter().find(|s| s.name == name)
    }

    /// Computes the invalidations and diagnostic update for one envelope.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> Dispatch {
        match envelope.kind() {
            EventKind::Heartbeat => Dispatch::diagnostic_only(DiagnosticUpdate::HeartbeatSeen),
            EventKind::ConnectionEstablished => {
                Dispatch::diagnostic_only(DiagnosticUpdate::ClearLastError)
            }
            EventKind::Error => Dispatch::diagnostic_only(DiagnosticUpdate::RecordError(
                error_message(&envelope.data),
            )),
            EventKind::Mutation { entity, action } => self
                .dispatch_mutation(&entity, action, &envelope.data)
                .unwrap_or_else(|| {
                    Dispatch::diagnostic_only(DiagnosticUpdate::UnknownEvent(
                        envelope.event_type.clone(),
                    ))
                }),
            EventKind::Unknown(event_type) => {
                Dispatch::diagnostic_only(DiagnosticUpdate::UnknownEvent(event_type))
            }
        }
    }

    fn dispatch_mutation(
        &self,
        entity: &str,
        action: MutationAction,
        data: &Value,
    ) -> Option<Dispatch> {
        let mut keys = InvalidationSet::new();

        if let Some(resource) = self.resource(entity) {
            // Every action, deletion included, touches the same three scopes.
            keys.insert(resource.collection_key());
            if let Some(id) = resource.id_in(data) {
                keys.insert(resource.item_key(&id));
                keys.insert(resource.detail_key(&id));
            }
        } else if let Some(sub) = self.subresource(entity) {
            if !matches!(action, MutationAction::Updated | MutationAction::Completed) {
                return None;
            }
            let owner = self.resource(&sub.owner)?;
            keys.insert(owner.collection_key());
            if let Some(owner_id) = sub.owner_id_in(data) {
                keys.insert(owner.item_key(&owner_id));
                keys.insert(owner.detail_key(&owner_id));
            }
        } else {
            return None;
        }

        Some(Dispatch {
            invalidations: keys,
            diagnostic: DiagnosticUpdate::None,
        })
    }
}

fn error_message(data: &Value) -> String {
    ["message", "error", "reason"]
        .iter()
        .find_map(|field| data.get(field).and_then(Value::as_str))
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(dispatch: &Dispatch) -> Vec<String> {
        dispatch
            .invalidations
            .iter()
            .map(|k| format!("{}={}", k.scope(), k))
            .collect()
    }

    #[test]
    fn test_chore_completed_invalidates_collection_item_detail() {
        let env = EventEnvelope::new("chore.completed", json!({"chore": {"id": 7}}));
        let result = EventDispatcher::default().dispatch(&env);

        let expected: InvalidationSet = [
            CacheKey::Collection("chores".into()),
            CacheKey::Item("chore:7".into()),
            CacheKey::Detail("choreDetails:7".into()),
        ]
        .into_iter()
        .collect();
        assert_eq!(result.invalidations, expected);
        assert_eq!(result.diagnostic, DiagnosticUpdate::None);
    }

    #[test]
    fn test_created_without_id_only_touches_collection() {
        let env = EventEnvelope::new("chore.created", json!({"title": "Dishes"}));
        let result = EventDispatcher::default().dispatch(&env);
        assert_eq!(keys(&result), vec!["collection=chores"]);
    }

    #[test]
    fn test_id_fallbacks() {
        let dispatcher = EventDispatcher::default();

        let flat = EventEnvelope::new("chore.updated", json!({"id": "abc"}));
        assert!(dispatcher
            .dispatch(&flat)
            .invalidations
            .contains(&CacheKey::Item("chore:abc".into())));

        let named = EventEnvelope::new("chore.skipped", json!({"choreId": 12}));
        assert!(dispatcher
            .dispatch(&named)
            .invalidations
            .contains(&CacheKey::Detail("choreDetails:12".into())));
    }

    #[test]
    fn test_deleted_invalidates_item_and_detail() {
        let env = EventEnvelope::new("chore.deleted", json!({"chore": {"id": 3}}));
        let result = EventDispatcher::default().dispatch(&env);
        assert_eq!(
            keys(&result),
            vec!["collection=chores", "item=chore:3", "detail=choreDetails:3"]
        );
    }

    #[test]
    fn test_subtask_invalidates_owner() {
        let env = EventEnvelope::new(
            "subtask.completed",
            json!({"subtask": {"id": 99, "choreId": 7}}),
        );
        let result = EventDispatcher::default().dispatch(&env);
        assert_eq!(
            keys(&result),
            vec!["collection=chores", "item=chore:7", "detail=choreDetails:7"]
        );

        let flat_owner = EventEnvelope::new("subtask.updated", json!({"choreId": "x1"}));
        assert!(EventDispatcher::default()
            .dispatch(&flat_owner)
            .invalidations
            .contains(&CacheKey::Item("chore:x1".into())));
    }

    #[test]
    fn test_subtask_without_owner_touches_collection() {
        let env = EventEnvelope::new("subtask.updated", json!({"subtask": {"id": 99}}));
        let result = EventDispatcher::default().dispatch(&env);
        assert_eq!(keys(&result), vec!["collection=chores"]);
    }

    #[test]
    fn test_subtask_unsupported_action_is_unknown() {
        let env = EventEnvelope::new("subtask.deleted", json!({}));
        let result = EventDispatcher::default().dispatch(&env);
        assert!(result.invalidations.is_empty());
        assert_eq!(
            result.diagnostic,
            DiagnosticUpdate::UnknownEvent("subtask.deleted".into())
        );
    }

    #[test]
    fn test_heartbeat_has_no_invalidations() {
        let env = EventEnvelope::parse(r#"{"type":"heartbeat"}"#).unwrap();
        let result = EventDispatcher::default().dispatch(&env);
        assert!(result.invalidations.is_empty());
        assert_eq!(result.diagnostic, DiagnosticUpdate::HeartbeatSeen);
    }

    #[test]
    fn test_channel_events() {
        let dispatcher = EventDispatcher::default();

        let established = dispatcher.dispatch(&EventEnvelope::connection_established());
        assert_eq!(established.diagnostic, DiagnosticUpdate::ClearLastError);

        let err = dispatcher.dispatch(&EventEnvelope::new(
            "error",
            json!({"message": "rate limited"}),
        ));
        assert!(err.invalidations.is_empty());
        assert_eq!(
            err.diagnostic,
            DiagnosticUpdate::RecordError("rate limited".into())
        );

        let bare = dispatcher.dispatch(&EventEnvelope::new("error", json!({})));
        assert_eq!(
            bare.diagnostic,
            DiagnosticUpdate::RecordError(GENERIC_SERVER_ERROR.into())
        );
    }

    #[test]
    fn test_unknown_types_pass_through() {
        let dispatcher = EventDispatcher::default();
        for event_type in ["reward.created", "chore.archived", "presence"] {
            let result = dispatcher.dispatch(&EventEnvelope::new(event_type, json!({})));
            assert!(result.invalidations.is_empty());
            assert_eq!(
                result.diagnostic,
                DiagnosticUpdate::UnknownEvent(event_type.to_string())
            );
        }
    }

    #[test]
    fn test_custom_registry() {
        let dispatcher = EventDispatcher::empty()
            .with_resource(ResourceSpec::new("reward", "rewards", "reward", "rewardDetails"));
        let env = EventEnvelope::new("reward.created", json!({"reward": {"id": 1}}));
        assert_eq!(
            keys(&dispatcher.dispatch(&env)),
            vec!["collection=rewards", "item=reward:1", "detail=rewardDetails:1"]
        );
    }
}
