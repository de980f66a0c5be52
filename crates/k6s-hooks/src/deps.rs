//! Dependency-manifest change detection.
//!
//! When a tool call touches a `package.json`, the current contents are
//! diffed against the last committed revision. Each changed entry yields
//! one audit event. No repository, no prior version with malformed JSON,
//! or an unparsable current file all yield nothing; detection is an
//! annotation, never an obstacle.

use serde_json::Value;

use k6s_core::events::EventType;

/// Sections diffed, in order.
const SECTIONS: &[&str] = &["dependencies", "devDependencies"];

/// One dependency change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyChange {
    pub event_type: EventType,
    pub section: String,
    pub name: String,
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl DependencyChange {
    /// Human-readable action line for the audit event.
    #[must_use]
    pub fn action(&self) -> String {
        match self.event_type {
            EventType::DependencyAdded => format!(
                "dependency_added: {} {}",
                self.name,
                self.current.as_deref().unwrap_or("")
            ),
            EventType::DependencyRemoved => format!(
                "dependency_removed: {} {}",
                self.name,
                self.previous.as_deref().unwrap_or("")
            ),
            _ => format!(
                "dependency_updated: {} {} → {}",
                self.name,
                self.previous.as_deref().unwrap_or("?"),
                self.current.as_deref().unwrap_or("?")
            ),
        }
    }
}

fn section_map<'a>(root: &'a Value, section: &str) -> Option<&'a serde_json::Map<String, Value>> {
    root.get(section).and_then(Value::as_object)
}

fn version(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

/// Diff a manifest against its previous revision.
///
/// `previous` of `None` means no committed version existed: every
/// current dependency is an addition. Malformed JSON on either side
/// yields no changes. Iteration is per section, additions and updates in
/// name order first, then removals.
#[must_use]
pub fn diff_package_json(previous: Option<&str>, current: &str) -> Vec<DependencyChange> {
    let Ok(current_root) = serde_json::from_str::<Value>(current) else {
        return Vec::new();
    };
    if !current_root.is_object() {
        return Vec::new();
    }

    let previous_root = match previous {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(root) if root.is_object() => Some(root),
            _ => return Vec::new(),
        },
        None => None,
    };

    let mut changes = Vec::new();
    for section in SECTIONS {
        let empty = serde_json::Map::new();
        let current_deps = section_map(&current_root, section).unwrap_or(&empty);
        let previous_deps = previous_root
            .as_ref()
            .and_then(|root| section_map(root, section))
            .unwrap_or(&empty);

        // Additions and updates, in (sorted) map order.
        for (name, value) in current_deps {
            let current_version = version(value);
            match previous_deps.get(name) {
                None => changes.push(DependencyChange {
                    event_type: EventType::DependencyAdded,
                    section: (*section).to_owned(),
                    name: name.clone(),
                    previous: None,
                    current: current_version,
                }),
                Some(previous_value) => {
                    let previous_version = version(previous_value);
                    if previous_version != current_version {
                        changes.push(DependencyChange {
                            event_type: EventType::DependencyUpdated,
                            section: (*section).to_owned(),
                            name: name.clone(),
                            previous: previous_version,
                            current: current_version,
                        });
                    }
                }
            }
        }

        // Removals.
        for (name, value) in previous_deps {
            if !current_deps.contains_key(name) {
                changes.push(DependencyChange {
                    event_type: EventType::DependencyRemoved,
                    section: (*section).to_owned(),
                    name: name.clone(),
                    previous: version(value),
                    current: None,
                });
            }
        }
    }

    changes
}
