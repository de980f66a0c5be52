use std::time::Duration;

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use k6s_core::config::WebhookConfig;
use k6s_core::time;
use k6s_store::models::AuditEvent;

type HmacSha256 = Hmac<Sha256>;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Total attempts per delivery (first try included).
pub const MAX_ATTEMPTS: u32 = 3;

/// Session identity carried in the envelope.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub session_id: String,
    pub trace_id: Option<String>,
}

/// Delivery retry state machine. Transitions are driven by attempt
/// outcomes; the async delivery loop is just the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    InFlight { attempt: u32 },
    Backoff { next_attempt: u32, delay: Duration },
    Done,
    Failed,
}

impl DeliveryState {
    /// Delay before the given attempt: 0 s, 1 s, 4 s.
    #[must_use]
    pub fn delay_before(attempt: u32) -> Duration {
        match attempt {
            0 | 1 => Duration::ZERO,
            n => Duration::from_secs(4u64.pow(n - 2)),
        }
    }

    /// Begin the given attempt.
    #[must_use]
    pub fn start_attempt(attempt: u32) -> Self {
        Self::InFlight { attempt }
    }

    /// Transition after a failed attempt.
    #[must_use]
    pub fn after_failure(self) -> Self {
        match self {
            Self::InFlight { attempt } if attempt < MAX_ATTEMPTS => Self::Backoff {
                next_attempt: attempt + 1,
                delay: Self::delay_before(attempt + 1),
            },
            _ => Self::Failed,
        }
    }

    /// Transition after a successful attempt.
    #[must_use]
    pub fn after_success(self) -> Self {
        Self::Done
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Fire-and-forget HTTP delivery of signed event envelopes.
pub struct WebhookDispatcher {
    targets: Vec<WebhookConfig>,
    client: reqwest::Client,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    pub fn new(targets: Vec<WebhookConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("khoregos-webhook/1.0")
            .build()
            .unwrap_or_default();
        Self {
            targets,
            client,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Schedule delivery to every target whose filter matches. Must be
    /// called from within a tokio runtime. Never fails.
    pub fn dispatch(&self, event: &AuditEvent, session: &SessionContext) {
        for target in &self.targets {
            if !target_matches(target, event) {
                continue;
            }
            let body = match envelope(event, session) {
                Some(body) => body,
                None => continue,
            };
            let signature = target
                .secret
                .as_deref()
                .and_then(resolve_secret)
                .map(|secret| sign(&secret, &body));
            let url = target.url.clone();
            let client = self.client.clone();

            debug!(url = %url, event_type = %event.event_type, "webhook delivery scheduled");
            let handle = tokio::spawn(deliver(client, url, body, signature));
            self.in_flight.lock().push(handle);
        }
    }

    /// Await all scheduled deliveries. Test hook; production drops the
    /// handles and lets the runtime finish them.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = self.in_flight.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn target_matches(target: &WebhookConfig, event: &AuditEvent) -> bool {
    target.events.is_empty()
        || target
            .events
            .iter()
            .any(|e| e == event.event_type.as_str())
}

fn envelope(event: &AuditEvent, session: &SessionContext) -> Option<String> {
    let value = serde_json::json!({
        "event": event,
        "session": {
            "sessionId": session.session_id,
            "traceId": session.trace_id,
        },
        "timestamp": time::now_iso(),
    });
    serde_json::to_string(&value).ok()
}

/// Resolve a configured secret. `$NAME` reads the process environment;
/// a missing variable disables signing for that delivery.
fn resolve_secret(configured: &str) -> Option<String> {
    match configured.strip_prefix('$') {
        Some(name) => std::env::var(name).ok(),
        None => Some(configured.to_owned()),
    }
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256={hex}")
}

async fn deliver(client: reqwest::Client, url: String, body: String, signature: Option<String>) {
    let mut state = DeliveryState::Pending;
    for attempt in 1..=MAX_ATTEMPTS {
        tokio::time::sleep(DeliveryState::delay_before(attempt)).await;
        state = DeliveryState::start_attempt(attempt);

        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        if let Some(sig) = &signature {
            request = request.header("X-K6s-Signature", sig.clone());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                state = state.after_success();
                debug!(url = %url, attempt, "webhook delivered");
                break;
            }
            Ok(response) => {
                debug!(url = %url, attempt, status = %response.status(), "webhook attempt failed");
                state = state.after_failure();
            }
            Err(e) => {
                debug!(url = %url, attempt, error = %e, "webhook attempt failed");
                state = state.after_failure();
            }
        }
        if state.is_terminal() {
            break;
        }
    }

    if state == DeliveryState::Failed {
        error!(url = %url, attempts = MAX_ATTEMPTS, "webhook delivery failed");
    }
}
