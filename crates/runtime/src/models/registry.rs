//! Prioritized catalog of candidate models and the fallback policy over it.
//!
//! Lower priority values are preferred. Ties are broken by registration
//! order. The registry never proposes the model it was asked to replace, so
//! every switch it recommends changes the active model's name.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::backend::ModelBundle;
use super::loader::ModelLoader;
use crate::telemetry::{emit, EventSink, Severity, TelemetryEvent};
use crate::types::LoadError;

/// Registry shared between a pipeline and its host.
pub type SharedRegistry = Arc<RwLock<ModelRegistry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistryEntry {
    pub name: String,
    /// Identifier handed to the loader.
    pub path: String,
    pub priority: i32,
    pub last_used: Option<DateTime<Utc>>,
}

/// Why the active model is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Error,
    LowConfidence,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Error => f.write_str("error"),
            FailureReason::LowConfidence => f.write_str("low_confidence"),
        }
    }
}

/// Reaction to one failure. Logged and consumed immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FallbackDecision {
    SwitchModel {
        #[serde(rename = "model_used")]
        target: String,
        target_path: String,
        reason: FailureReason,
        timestamp: DateTime<Utc>,
    },
    NoFallbackAvailable {
        #[serde(rename = "model_used")]
        model: String,
        reason: FailureReason,
        timestamp: DateTime<Utc>,
    },
}

impl FallbackDecision {
    pub fn action(&self) -> &'static str {
        match self {
            FallbackDecision::SwitchModel { .. } => "switch_model",
            FallbackDecision::NoFallbackAvailable { .. } => "no_fallback_available",
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            FallbackDecision::SwitchModel { reason, .. }
            | FallbackDecision::NoFallbackAvailable { reason, .. } => *reason,
        }
    }
}

/// Named candidate models, kept in registration order.
pub struct ModelRegistry {
    entries: Vec<ModelRegistryEntry>,
    primary: Option<String>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("entries", &self.entries)
            .field("primary", &self.primary)
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            entries: Vec::new(),
            primary: None,
            sink,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Insert or overwrite `name`. `path` defaults to the name itself.
    ///
    /// Overwriting keeps the entry's position and `last_used`. The entry
    /// becomes primary when there is none yet or its priority is strictly
    /// lower than the current primary's.
    pub fn register(&mut self, name: impl Into<String>, path: Option<&str>, priority: i32) {
        let name = name.into();
        let path = path.map(str::to_string).unwrap_or_else(|| name.clone());

        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => {
                existing.path = path;
                existing.priority = priority;
            }
            None => self.entries.push(ModelRegistryEntry {
                name: name.clone(),
                path,
                priority,
                last_used: None,
            }),
        }

        let promote = match self.primary.as_deref().and_then(|p| self.get(p)) {
            Some(current) => priority < current.priority,
            None => true,
        };
        if promote {
            self.primary = Some(name.clone());
        }

        emit(
            self.sink.as_ref(),
            TelemetryEvent::new("register_model")
                .with("model", name.as_str())
                .with("priority", priority)
                .with("primary", self.primary.clone()),
        );
    }

    /// Most-preferred entry whose name is not `excluding`.
    ///
    /// A name that was never registered excludes nothing, so the whole
    /// registry is eligible.
    pub fn next_fallback(&self, excluding: &str) -> Option<&ModelRegistryEntry> {
        self.entries
            .iter()
            .filter(|e| e.name != excluding)
            .min_by_key(|e| e.priority)
    }

    /// Decide how to react to `model` failing. Always logged.
    pub fn handle_failure(&self, model: &str, reason: FailureReason) -> FallbackDecision {
        let timestamp = Utc::now();
        let decision = match self.next_fallback(model) {
            Some(entry) => FallbackDecision::SwitchModel {
                target: entry.name.clone(),
                target_path: entry.path.clone(),
                reason,
                timestamp,
            },
            None => FallbackDecision::NoFallbackAvailable {
                model: model.to_string(),
                reason,
                timestamp,
            },
        };

        let severity = match decision {
            FallbackDecision::SwitchModel { .. } => Severity::Warning,
            FallbackDecision::NoFallbackAvailable { .. } => Severity::Error,
        };
        emit(
            self.sink.as_ref(),
            TelemetryEvent::new("fallback")
                .with_severity(severity)
                .with("failed_model", model)
                .merge(serde_json::to_value(&decision).unwrap_or_default()),
        );

        decision
    }

    /// Entries by ascending priority, registration order on ties.
    pub fn list(&self) -> Vec<ModelRegistryEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.priority);
        entries
    }

    pub fn get(&self, name: &str) -> Option<&ModelRegistryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn primary(&self) -> Option<&ModelRegistryEntry> {
        self.primary.as_deref().and_then(|name| self.get(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stamp `last_used` on `name`. Returns false for unknown names.
    pub fn mark_used(&mut self, name: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.last_used = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Resolve a fallback target through `loader`.
    pub fn load_model(
        &self,
        loader: &ModelLoader,
        identifier: &str,
    ) -> Result<ModelBundle, LoadError> {
        let bundle = loader.load(identifier)?;
        emit(
            self.sink.as_ref(),
            TelemetryEvent::new("fallback_model_loaded")
                .with("model", identifier)
                .with("source", bundle.source.as_str()),
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;

    fn registry() -> (ModelRegistry, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (ModelRegistry::new(sink.clone()), sink)
    }

    #[test]
    fn test_primary_is_lowest_priority_first_registered() {
        let (mut reg, _) = registry();
        reg.register("a", None, 2);
        reg.register("b", None, 1);
        reg.register("c", None, 1);
        assert_eq!(reg.primary().unwrap().name, "b");
    }

    #[test]
    fn test_next_fallback_never_returns_excluded() {
        let (mut reg, _) = registry();
        reg.register("primary", None, 1);
        reg.register("backup", Some("/models/backup"), 2);
        reg.register("spare", None, 2);

        let fallback = reg.next_fallback("primary").unwrap();
        assert_eq!(fallback.name, "backup");
        assert_eq!(fallback.path, "/models/backup");
        assert_eq!(reg.next_fallback("backup").unwrap().name, "primary");
    }

    #[test]
    fn test_next_fallback_tie_breaks_by_insertion() {
        let (mut reg, _) = registry();
        reg.register("x", None, 0);
        reg.register("first", None, 3);
        reg.register("second", None, 3);
        // Re-registering keeps the original slot.
        reg.register("first", None, 3);
        assert_eq!(reg.next_fallback("x").unwrap().name, "first");
    }

    #[test]
    fn test_single_entry_has_no_fallback() {
        let (mut reg, sink) = registry();
        reg.register("only", None, 1);

        let decision = reg.handle_failure("only", FailureReason::Error);
        assert_eq!(decision.action(), "no_fallback_available");

        let logged = sink.events_of("fallback");
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].payload["action"], "no_fallback_available");
        assert_eq!(logged[0].payload["reason"], "error");
    }

    #[test]
    fn test_unregistered_name_treats_registry_as_eligible() {
        let (mut reg, _) = registry();
        reg.register("only", None, 1);

        match reg.handle_failure("ghost", FailureReason::LowConfidence) {
            FallbackDecision::SwitchModel { target, reason, .. } => {
                assert_eq!(target, "only");
                assert_eq!(reason, FailureReason::LowConfidence);
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_registry_declines() {
        let (reg, _) = registry();
        assert!(reg.next_fallback("anything").is_none());
        assert_eq!(
            reg.handle_failure("anything", FailureReason::Error).action(),
            "no_fallback_available"
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let (mut reg, _) = registry();
        reg.register("primary", Some("p"), 1);
        reg.register("backup", Some("b"), 2);
        assert!(reg.mark_used("backup"));
        let before = reg.list();

        reg.register("backup", Some("b"), 2);
        assert_eq!(reg.list(), before);
        assert_eq!(reg.len(), 2);
        assert!(reg.get("backup").unwrap().last_used.is_some());
    }

    #[test]
    fn test_list_sorted_stable() {
        let (mut reg, _) = registry();
        reg.register("c", None, 5);
        reg.register("a", None, 1);
        reg.register("b", None, 5);
        let names: Vec<_> = reg.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_decision_wire_format() {
        let (mut reg, sink) = registry();
        reg.register("primary", None, 1);
        reg.register("backup", Some("org/backup"), 2);

        let decision = reg.handle_failure("primary", FailureReason::LowConfidence);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "switch_model");
        assert_eq!(json["model_used"], "backup");
        assert_eq!(json["target_path"], "org/backup");
        assert_eq!(json["reason"], "low_confidence");

        assert_eq!(sink.events_of("register_model").len(), 2);
    }

    #[test]
    fn test_mark_used_unknown() {
        let (mut reg, _) = registry();
        assert!(!reg.mark_used("nobody"));
    }
}
