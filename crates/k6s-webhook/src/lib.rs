//! Fire-and-forget webhook delivery.
//!
//! Each audit event is offered to every configured target whose event
//! filter matches, as a signed JSON envelope. Deliveries run as tokio
//! tasks; the dispatcher tracks their join handles so tests can `drain()`
//! while production callers drop them. Failures never propagate to the
//! audit write path.

mod dispatcher;

pub use dispatcher::{
    DeliveryState, SessionContext, WebhookDispatcher, MAX_ATTEMPTS, REQUEST_TIMEOUT,
};
