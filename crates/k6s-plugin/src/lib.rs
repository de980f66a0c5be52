//! Optional out-of-tree extensions.
//!
//! Plugins hang off the lifecycle process only; hook subprocesses never
//! construct a [`PluginManager`]. Every hook invocation is best-effort: a
//! plugin error is logged and swallowed, never allowed to affect audit
//! persistence.
//!
//! Rust has no idiomatic runtime module loading, so a plugin entry's
//! `module` field keys into a compiled-in registry of factories instead of
//! naming a loadable file. Unknown modules are skipped with a warning.

use std::collections::HashMap;

use tracing::warn;

use k6s_core::config::PluginConfig;
use k6s_store::models::{AuditEvent, BoundaryViolation, Session};

/// Error type plugins report. Opaque to the core; only ever logged.
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// A governance extension. All hooks default to no-ops so plugins
/// implement only what they care about.
pub trait Plugin: Send + Sync {
    /// Stable plugin name for log attribution.
    fn name(&self) -> &str;

    fn on_session_start(&self, _session: &Session) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_session_stop(&self, _session: &Session) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_audit_event(&self, _event: &AuditEvent) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_tool_use(&self, _event: &AuditEvent) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_gate_trigger(&self, _event: &AuditEvent) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_boundary_violation(&self, _violation: &BoundaryViolation) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Factory producing a plugin from its config map.
pub type PluginFactory =
    fn(&serde_json::Map<String, serde_json::Value>) -> Box<dyn Plugin>;

/// Compiled-in registry mapping `module` keys to factories.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: impl Into<String>, factory: PluginFactory) {
        let _ = self.factories.insert(module.into(), factory);
    }

    #[must_use]
    pub fn get(&self, module: &str) -> Option<&PluginFactory> {
        self.factories.get(module)
    }
}

/// Holds the loaded plugins and fans hook invocations out to them.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration entries. Unknown modules are skipped.
    #[must_use]
    pub fn from_config(entries: &[PluginConfig], registry: &PluginRegistry) -> Self {
        let mut manager = Self::new();
        for entry in entries {
            match registry.get(&entry.module) {
                Some(factory) => manager.add(factory(&entry.config)),
                None => {
                    warn!(plugin = %entry.name, module = %entry.module, "unknown plugin module, skipping");
                }
            }
        }
        manager
    }

    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn on_session_start(&self, session: &Session) {
        self.each("on_session_start", |p| p.on_session_start(session));
    }

    pub fn on_session_stop(&self, session: &Session) {
        self.each("on_session_stop", |p| p.on_session_stop(session));
    }

    pub fn on_audit_event(&self, event: &AuditEvent) {
        self.each("on_audit_event", |p| p.on_audit_event(event));
    }

    pub fn on_tool_use(&self, event: &AuditEvent) {
        self.each("on_tool_use", |p| p.on_tool_use(event));
    }

    pub fn on_gate_trigger(&self, event: &AuditEvent) {
        self.each("on_gate_trigger", |p| p.on_gate_trigger(event));
    }

    pub fn on_boundary_violation(&self, violation: &BoundaryViolation) {
        self.each("on_boundary_violation", |p| p.on_boundary_violation(violation));
    }

    fn each<F>(&self, hook: &str, f: F)
    where
        F: Fn(&dyn Plugin) -> Result<(), PluginError>,
    {
        for plugin in &self.plugins {
            if let Err(e) = f(plugin.as_ref()) {
                warn!(plugin = plugin.name(), hook, error = %e, "plugin hook failed");
            }
        }
    }
}
