//! End-to-end tests for worker → interpreter dispatch
//!
//! These drive the public API the way an embedding host does: coroutines park
//! in WAIT while a worker thread does blocking work, and the worker hands the
//! result back through a bridge.

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tessel_runtime::{
    AsyncBridge, CoroutineHandle, CoroutineRegistry, CoroutineState, EventLoop, HostContext,
    Notifier, Resumed, RuntimeConfig, RuntimeError, TimerSet,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Host {
    registry: CoroutineRegistry,
    timers: TimerSet<Host>,
    counter: u64,
    replies: HashMap<CoroutineHandle, String>,
}

impl HostContext for Host {
    fn runtime(&mut self) -> (&mut CoroutineRegistry, &mut TimerSet<Self>) {
        (&mut self.registry, &mut self.timers)
    }
}

#[test]
fn test_resume_task_flips_waiting_coroutine() {
    init_tracing();
    let notifier = Notifier::new();
    let bridge = AsyncBridge::<Host>::create(&notifier);
    let mut host = Host::default();

    let h1 = CoroutineHandle::new(1);
    host.registry.host(h1).unwrap();
    assert_eq!(host.registry.find(h1).unwrap().state(), CoroutineState::WAIT);

    let handle = bridge.handle();
    thread::spawn(move || {
        handle
            .post(move |host: &mut Host| {
                host.counter += 1;
                host.registry.set_state(h1, CoroutineState::BUSY).unwrap();
            })
            .unwrap();
    })
    .join()
    .unwrap();

    assert!(notifier.try_take());
    assert_eq!(bridge.drain(&mut host), 1);
    assert_eq!(host.counter, 1);
    assert_eq!(host.registry.find(h1).unwrap().state(), CoroutineState::BUSY);
}

#[test]
fn test_parked_requests_complete_out_of_order() {
    init_tracing();
    let mut ev = EventLoop::new(Host::default(), RuntimeConfig::default());
    let requests: Vec<CoroutineHandle> = (1..=4).map(CoroutineHandle::new).collect();
    for &h in &requests {
        ev.context_mut().coroutines().host(h).unwrap();
        ev.context_mut()
            .coroutines()
            .set_state(h, CoroutineState::BUSY)
            .unwrap();
    }

    // every request starts its I/O and parks
    let parked = ev.sweep(|_, _| Resumed::Suspended(0));
    assert_eq!(parked, 4);

    // workers finish in reverse order and hand back their replies
    let start = Arc::new(Barrier::new(requests.len()));
    let workers: Vec<_> = requests
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &h)| {
            let handle = ev.handle();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                thread::sleep(Duration::from_millis(5 * i as u64));
                handle
                    .post(move |host: &mut Host| {
                        host.replies.insert(h, format!("reply {}", h.raw()));
                    })
                    .unwrap();
                handle.resume(h).unwrap();
            })
        })
        .collect();

    let count = requests.len();
    ev.run_until(|host| host.replies.len() == count);
    for w in workers {
        w.join().unwrap();
    }
    // the resume tasks may trail the replies by one tick
    ev.run_until(|host| {
        host.registry
            .handles()
            .iter()
            .all(|&h| host.registry.find(h).is_some_and(|c| c.state().is_runnable()))
    });

    // resumed coroutines read their reply and finish
    let mut seen = Vec::new();
    let finished = ev.sweep(|h, _| {
        seen.push(h.raw());
        Resumed::Returned(1)
    });
    assert_eq!(finished, 4);
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(ev.context_mut().coroutines().is_empty());
    assert_eq!(ev.context().replies[&CoroutineHandle::new(3)], "reply 3");
}

#[test]
fn test_worker_blocking_call_round_trip() {
    init_tracing();
    let mut ev = EventLoop::new(Host::default(), RuntimeConfig::default());
    ev.context_mut().counter = 7;

    let handle = ev.handle();
    let worker = thread::spawn(move || -> tessel_runtime::Result<u64> {
        let before = handle.call(|host: &mut Host| host.counter)?;
        handle.call(move |host: &mut Host| {
            host.counter = before * 6;
            host.counter
        })
    });

    ev.run_until(|host| host.counter == 42);
    assert_eq!(worker.join().unwrap(), Ok(42));
}

#[test]
fn test_worker_reply_cancels_timeout_timer() {
    init_tracing();
    let mut ev = EventLoop::new(Host::default(), RuntimeConfig::default());
    let h = CoroutineHandle::new(1);
    ev.context_mut().coroutines().host(h).unwrap();
    ev.context_mut()
        .coroutines()
        .set_state(h, CoroutineState::BUSY)
        .unwrap();

    // the request parks with a long timeout armed; the worker beats it
    let timeout = ev.timers_mut().create();
    ev.sweep(|h, timers| {
        timers
            .start(timeout, 60_000, 0, move |host: &mut Host| {
                host.replies.insert(h, "timed out".to_string());
            })
            .unwrap();
        Resumed::Suspended(0)
    });

    let handle = ev.handle();
    thread::spawn(move || {
        handle
            .post(move |host: &mut Host| {
                host.timers().stop(timeout).unwrap();
                host.replies.insert(h, "ok".to_string());
                host.coroutines().set_state(h, CoroutineState::BUSY).unwrap();
            })
            .unwrap();
    })
    .join()
    .unwrap();

    ev.run_until(|host| !host.replies.is_empty());
    assert!(!ev.timers_mut().is_active(timeout));
    assert_eq!(ev.context().replies[&h], "ok");
}

#[test]
fn test_shutdown_rejects_late_workers() {
    init_tracing();
    let notifier = Notifier::new();
    let bridge = AsyncBridge::<Host>::create(&notifier);
    let handle = bridge.handle();
    handle.post(|host: &mut Host| host.counter += 1).unwrap();

    bridge.destroy();

    let late = thread::spawn(move || handle.post(|host: &mut Host| host.counter += 1))
        .join()
        .unwrap();
    assert_eq!(late, Err(RuntimeError::BridgeClosed));
}
