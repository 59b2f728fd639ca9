//! Collaborator interfaces consumed by the engine.
//!
//! The original system wired shared manager singletons together after
//! construction; here every external dependency is an explicit trait
//! object injected through [`Collaborators`]. All methods are called from
//! the engine's single owning task; implementations that need to do real
//! work asynchronously should hand off internally.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::Result;
use crate::types::{AlertRecord, Coordinate};

/// Receives finished alert records for storage/notification. Ownership of
/// the record transfers to the sink.
pub trait AlertSink: Send + Sync {
    /// Accept one finished alert.
    fn submit(&self, alert: AlertRecord);
}

/// Posts and withdraws user-visible notifications.
///
/// `post_or_replace` with an id that is already live replaces the previous
/// notification in place, so at most one notification per id exists.
pub trait NotificationSink: Send + Sync {
    /// Post a notification, replacing any live one with the same id.
    fn post_or_replace(&self, id: &str, title: &str, body: &str, urgent: bool);
    /// Withdraw a pending or delivered notification. A no-op for ids that
    /// are not live.
    fn withdraw(&self, id: &str);
}

/// Receives the haptic/audio cue pulses fired while a crash countdown is
/// armed.
pub trait CueSink: Send + Sync {
    /// Fire one cue pulse.
    fn pulse(&self);
}

/// Dispatches a message to the configured emergency contact (SMS in the
/// reference deployment; the mechanics are out of scope here).
pub trait EmergencyContactSink: Send + Sync {
    /// Send `message` to `phone`.
    fn notify(&self, phone: &str, message: &str);
}

/// Places an emergency voice call.
pub trait EmergencyCallSink: Send + Sync {
    /// Dial `number`.
    fn dial(&self, number: &str);
}

/// On-demand single-shot device location fixes.
///
/// The request is fire-and-forget: the source answers over the supplied
/// oneshot channel (with `None` when no fix could be obtained), and the
/// completion re-enters the engine through its serialized event queue.
pub trait LocationSource: Send + Sync {
    /// Request one fix, answered over `reply`.
    fn request_fix(&self, reply: oneshot::Sender<Option<Coordinate>>);
}

/// Opaque token representing one extended-execution grant.
#[derive(Debug, PartialEq, Eq)]
pub struct ExecutionToken(u64);

impl ExecutionToken {
    /// Wrap a host-assigned grant id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The host-assigned grant id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.0
    }
}

/// Scoped permission to keep processing timers/events while the hosting
/// process would otherwise be suspended.
///
/// Acquired at Idle→Armed and released exactly once on leaving Armed. A
/// host with no suspension concept may implement this as a no-op.
pub trait ExecutionExtension: Send + Sync {
    /// Acquire a grant.
    fn acquire(&self) -> ExecutionToken;
    /// Release a previously acquired grant.
    fn release(&self, token: ExecutionToken);
}

/// The outbound half of an established transport session.
///
/// Inbound frames and link-state transitions are pushed into the engine by
/// the transport adapter; the engine only ever writes.
pub trait TransportLink: Send + Sync {
    /// Write one payload to the sensor unit (write-with-acknowledgement is
    /// the transport's concern).
    ///
    /// # Errors
    ///
    /// Returns a transport error on write failure; the engine treats this
    /// as non-fatal status.
    fn send(&self, payload: &[u8]) -> Result<()>;
}

/// The full set of injected collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Alert storage/notification.
    pub alerts: Arc<dyn AlertSink>,
    /// User-visible notifications.
    pub notifications: Arc<dyn NotificationSink>,
    /// Haptic/audio cue.
    pub cue: Arc<dyn CueSink>,
    /// Emergency contact messaging.
    pub contact: Arc<dyn EmergencyContactSink>,
    /// Emergency voice calls.
    pub caller: Arc<dyn EmergencyCallSink>,
    /// Device location fixes.
    pub location: Arc<dyn LocationSource>,
    /// Extended-execution grants.
    pub execution: Arc<dyn ExecutionExtension>,
    /// Outbound transport writes.
    pub transport: Arc<dyn TransportLink>,
}
