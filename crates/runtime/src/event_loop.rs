//! Interpreter-thread event loop
//!
//! Ties the pieces together for a host that does not already have a loop of
//! its own: one interpreter context, the notifier every bridge signals and a
//! primary bridge (plus any opened later). The timer set lives in the context
//! (see [`HostContext::runtime`]) so tasks and timer callbacks can reach it.
//!
//! ## Tick
//!
//! 1. poll timers (expired timers become bridge tasks)
//! 2. drain every bridge, primary first
//!
//! Coroutine sweeps are driven separately through [`EventLoop::sweep`]
//! because only the host knows how to resume a coroutine.
//!
//! Between ticks the thread sleeps on the notifier for at most
//! `RuntimeConfig::poll_ms`, or less when a timer is due sooner.

use crate::bridge::{AsyncBridge, BridgeHandle, HostContext};
use crate::config::RuntimeConfig;
use crate::coroutine::{CoroutineHandle, Resumed};
use crate::notify::Notifier;
use crate::timer::TimerSet;
use std::time::Duration;
use tracing::{debug, trace};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub timers_fired: usize,
    pub tasks_run: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.timers_fired == 0 && self.tasks_run == 0
    }
}

impl std::ops::AddAssign for TickReport {
    fn add_assign(&mut self, rhs: Self) {
        self.timers_fired += rhs.timers_fired;
        self.tasks_run += rhs.tasks_run;
    }
}

pub struct EventLoop<C: HostContext> {
    bridges: Vec<AsyncBridge<C>>,
    /// Cached handle of `bridges[0]`, where expired timers are queued
    primary: BridgeHandle<C>,
    notifier: Notifier,
    config: RuntimeConfig,
    ctx: C,
}

impl<C: HostContext> EventLoop<C> {
    pub fn new(ctx: C, config: RuntimeConfig) -> Self {
        if config.diagnostics {
            crate::diagnostics::install_signal_handler();
        }

        let notifier = Notifier::new();
        let bridge = AsyncBridge::create(&notifier);
        let primary = bridge.handle();
        debug!(poll_ms = config.poll_ms, "event loop created");

        Self {
            bridges: vec![bridge],
            primary,
            notifier,
            config,
            ctx,
        }
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Submission handle of the primary bridge
    pub fn handle(&self) -> BridgeHandle<C> {
        self.primary.clone()
    }

    /// Open another bridge on the same notifier, e.g. one per plugin.
    pub fn open_bridge(&mut self) -> BridgeHandle<C> {
        let bridge = AsyncBridge::create(&self.notifier);
        let handle = bridge.handle();
        self.bridges.push(bridge);
        handle
    }

    /// Destroy a bridge opened with [`open_bridge`](Self::open_bridge).
    ///
    /// The primary bridge cannot be closed this way. Returns whether a bridge
    /// was closed.
    pub fn close_bridge(&mut self, bridge_id: u64) -> bool {
        let found = self
            .bridges
            .iter()
            .skip(1)
            .position(|b| b.id() == bridge_id);
        match found {
            Some(index) => {
                self.bridges.remove(index + 1).destroy();
                true
            }
            None => false,
        }
    }

    pub fn timers_mut(&mut self) -> &mut TimerSet<C> {
        self.ctx.timers()
    }

    /// Tasks waiting across every bridge
    pub fn pending(&self) -> usize {
        self.bridges.iter().map(AsyncBridge::pending).sum()
    }

    /// Poll timers, then drain every bridge once.
    pub fn tick(&mut self) -> TickReport {
        let timers_fired = self.ctx.timers().poll(&self.primary);
        let mut tasks_run = 0;
        for bridge in &self.bridges {
            tasks_run += bridge.drain(&mut self.ctx);
        }
        let report = TickReport {
            timers_fired,
            tasks_run,
        };
        if !report.is_idle() {
            trace!(timers_fired, tasks_run, "tick");
        }
        report
    }

    /// Resume every runnable coroutine once.
    ///
    /// `resume` gets the timer set alongside the handle, so a resumed
    /// coroutine can start or stop timers before it yields.
    pub fn sweep(
        &mut self,
        mut resume: impl FnMut(CoroutineHandle, &mut TimerSet<C>) -> Resumed,
    ) -> usize {
        let (registry, timers) = self.ctx.runtime();
        registry.sweep(|handle| resume(handle, timers))
    }

    /// Sleep until a bridge is signalled or the next timer is due.
    ///
    /// Returns `true` if woken by a signal.
    pub fn wait(&mut self) -> bool {
        let mut timeout = self.config.poll_interval();
        if let Some(ms) = self.ctx.timers().time_until_next() {
            timeout = timeout.min(Duration::from_millis(ms));
        }
        if timeout.is_zero() {
            return self.notifier.try_take();
        }
        self.notifier.wait_timeout(timeout)
    }

    /// Tick and wait until `done` holds for the context.
    pub fn run_until(&mut self, mut done: impl FnMut(&mut C) -> bool) -> TickReport {
        let mut total = TickReport::default();
        loop {
            total += self.tick();
            if done(&mut self.ctx) {
                return total;
            }
            self.wait();
        }
    }
}
