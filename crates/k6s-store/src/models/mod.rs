//! Typed records for every persisted entity.
//!
//! Each model serializes to an ordered column/value row (`to_row`) and
//! back (`from_row`); round-tripping is lossless. JSON-shaped fields stay
//! typed in memory and are serialized only at the storage edge.

mod agent;
mod audit;
mod context;
mod session;

pub use agent::{Agent, AgentRole, AgentState};
pub use audit::AuditEvent;
pub use context::{BoundaryViolation, ContextEntry, EnforcementAction, FileLock, ViolationType};
pub use session::{Session, SessionState};
