//! Runtime Error Handling
//!
//! Lifecycle and lookup failures are returned to the immediate caller as
//! [`RuntimeError`]; nothing is thrown across the thread boundary. Container
//! contract violations (double-linking, erasing a foreign node) are not
//! represented here: they are `unsafe` preconditions in `tessel-core`.

use crate::coroutine::CoroutineHandle;
use crate::timer::TimerId;

/// Error returned by registry, bridge and timer operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The coroutine handle already has a scheduling record
    AlreadyRegistered(CoroutineHandle),
    /// No scheduling record exists for the handle
    UnknownCoroutine(CoroutineHandle),
    /// A hook token was presented to a coroutine that never issued it
    ForeignHook(CoroutineHandle),
    /// The bridge was destroyed; the task was not enqueued
    BridgeClosed,
    /// The task was discarded before it ran
    Cancelled,
    /// A blocking call was issued from the thread that drains the bridge
    WouldBlockOwner,
    /// No timer with this id exists in the set
    UnknownTimer(TimerId),
    /// Scheduling bits outside WAIT/BUSY/DEAD/ERROR
    InvalidState(u8),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::AlreadyRegistered(h) => {
                write!(f, "coroutine {} is already registered", h)
            }
            RuntimeError::UnknownCoroutine(h) => write!(f, "coroutine {} is not registered", h),
            RuntimeError::ForeignHook(h) => {
                write!(f, "hook token does not belong to coroutine {}", h)
            }
            RuntimeError::BridgeClosed => write!(f, "async bridge is closed"),
            RuntimeError::Cancelled => write!(f, "task was cancelled before it ran"),
            RuntimeError::WouldBlockOwner => {
                write!(f, "blocking call from the bridge's own thread would deadlock")
            }
            RuntimeError::UnknownTimer(id) => write!(f, "timer {} does not exist", id),
            RuntimeError::InvalidState(bits) => {
                write!(f, "invalid coroutine state bits: {:#04x}", bits)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let h = CoroutineHandle::new(7);
        assert_eq!(
            RuntimeError::AlreadyRegistered(h).to_string(),
            "coroutine #7 is already registered"
        );
        assert_eq!(RuntimeError::BridgeClosed.to_string(), "async bridge is closed");
        assert_eq!(
            RuntimeError::InvalidState(9).to_string(),
            "invalid coroutine state bits: 0x09"
        );
    }

    #[test]
    fn test_format_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("panic message");
        assert_eq!(format_panic_payload(&payload), "panic message");

        let payload: Box<dyn std::any::Any + Send> = Box::new("owned panic".to_string());
        assert_eq!(format_panic_payload(&payload), "owned panic");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(format_panic_payload(&payload), "unknown panic");
    }
}
