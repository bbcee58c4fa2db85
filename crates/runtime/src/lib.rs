//! Tessel Runtime: coroutine scheduling and cross-thread dispatch
//!
//! Key design principles:
//! - One interpreter thread owns every coroutine record, hook and timer.
//!   Those types are `!Send`, so the compiler enforces the affinity.
//! - Worker threads run in parallel and reach interpreter state only by
//!   submitting tasks through an `AsyncBridge`.
//! - A coroutine is either BUSY (resumed every sweep) or parked in WAIT until
//!   something resumes it; DEAD/ERROR are terminal.
//!
//! # Modules
//!
//! - `coroutine`: handle → record registry, state machine, schedule hooks
//! - `bridge`: task queue drained on the interpreter thread
//! - `notify`: coalescing wakeup the interpreter thread sleeps on
//! - `timer`: one-shot/repeating deadlines dispatched through a bridge
//! - `event_loop`: tick/wait loop tying the above together
//! - `diagnostics`: SIGQUIT statistics dump

pub mod bridge;
pub mod clock;
pub mod config;
pub mod coroutine;
pub mod diagnostics;
pub mod error;
pub mod event_loop;
pub mod notify;
pub mod timer;

pub use bridge::{AsyncBridge, BridgeHandle, HostContext, Task, TimerCallback};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::RuntimeConfig;
pub use coroutine::{
    Coroutine, CoroutineHandle, CoroutineRegistry, CoroutineState, HookToken, Resumed, RunState,
};
pub use diagnostics::{dump_diagnostics, install_signal_handler};
pub use error::{Result, RuntimeError};
pub use event_loop::{EventLoop, TickReport};
pub use notify::Notifier;
pub use timer::{TimerId, TimerSet, TimerTicket};
