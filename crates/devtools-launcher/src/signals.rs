//! Process-wide signal fan-out.
//!
//! The OS delivers SIGINT, SIGTERM and SIGHUP once per process, but every
//! supervised browser wants to react to them. [`SignalBroadcaster`] listens
//! upstream exactly once and re-emits each signal to its subscribers in
//! registration order. After a termination signal has been delivered to
//! every subscriber the process exits with the signal's conventional code.
//!
//! The OS listeners run on a dedicated thread with its own runtime, so they
//! keep working whichever runtime the subscribers came from.
//!
//! Rust has no implicit "process is exiting" hook, so applications call
//! [`SignalBroadcaster::notify_exit`] before returning from `main`.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use tracing::{debug, info, warn};

static GLOBAL: OnceLock<Arc<SignalBroadcaster>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessSignal {
    /// The application is about to exit normally
    Exiting,
    Interrupt,
    Terminate,
    Hangup,
}

impl ProcessSignal {
    /// Status this process exits with after the signal has been broadcast
    pub fn exit_code(self) -> Option<i32> {
        match self {
            ProcessSignal::Exiting => None,
            ProcessSignal::Interrupt => Some(2),
            ProcessSignal::Terminate => Some(15),
            ProcessSignal::Hangup => Some(1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessSignal::Exiting => "exit",
            ProcessSignal::Interrupt => "SIGINT",
            ProcessSignal::Terminate => "SIGTERM",
            ProcessSignal::Hangup => "SIGHUP",
        }
    }
}

pub type SignalHandler = Arc<dyn Fn(ProcessSignal) + Send + Sync>;
type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;
type ReadySender = std::sync::mpsc::Sender<io::Result<()>>;

struct Entry {
    id: u64,
    signal: ProcessSignal,
    handler: SignalHandler,
}

enum Upstream {
    /// Nothing installed yet
    Idle,
    /// OS listeners live on the signal thread for the rest of the process
    Listening,
    /// Never listens to the OS; signals arrive through `dispatch`
    Detached,
    /// Installing the OS listeners failed
    Unavailable,
}

pub struct SignalBroadcaster {
    subscribers: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    upstream: Mutex<Upstream>,
    /// Set by the first broadcast; later signals skip the subscribers
    muted: AtomicBool,
    exit: Mutex<ExitHandler>,
}

impl SignalBroadcaster {
    /// The shared instance. OS listeners are installed on the first subscription.
    pub fn global() -> Arc<SignalBroadcaster> {
        GLOBAL
            .get_or_init(|| {
                Arc::new(Self::with_upstream(
                    Upstream::Idle,
                    Arc::new(|code| std::process::exit(code)),
                ))
            })
            .clone()
    }

    /// A broadcaster that never touches OS signal delivery.
    ///
    /// `exit` replaces process termination after a termination signal.
    pub fn detached(exit: impl Fn(i32) + Send + Sync + 'static) -> Arc<SignalBroadcaster> {
        Arc::new(Self::with_upstream(Upstream::Detached, Arc::new(exit)))
    }

    fn with_upstream(upstream: Upstream, exit: ExitHandler) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            upstream: Mutex::new(upstream),
            muted: AtomicBool::new(false),
            exit: Mutex::new(exit),
        }
    }

    /// Replace what runs after a termination signal was broadcast.
    ///
    /// The global instance calls `std::process::exit` by default.
    pub fn set_exit_handler(&self, exit: impl Fn(i32) + Send + Sync + 'static) {
        *self.exit.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(exit);
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(
        self: &Arc<Self>,
        signal: ProcessSignal,
        handler: impl Fn(ProcessSignal) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().push(Entry {
            id,
            signal,
            handler: Arc::new(handler),
        });
        debug!(signal = signal.name(), id, "Signal subscription added");
        self.ensure_listening();

        Subscription {
            id,
            signal,
            broadcaster: Arc::downgrade(self),
            released: AtomicBool::new(false),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.entries().retain(|entry| entry.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.entries().len()
    }

    /// Deliver `signal` to its subscribers, then exit for termination signals.
    ///
    /// Only the first broadcast reaches the subscribers. Later termination
    /// signals go straight to the exit handler.
    pub fn dispatch(&self, signal: ProcessSignal) {
        if self.muted.swap(true, Ordering::AcqRel) {
            debug!(signal = signal.name(), "Already broadcast; skipping subscribers");
        } else {
            // Snapshot so handlers can release subscriptions while we iterate
            let handlers: Vec<SignalHandler> = self
                .entries()
                .iter()
                .filter(|entry| entry.signal == signal)
                .map(|entry| entry.handler.clone())
                .collect();

            info!(
                signal = signal.name(),
                subscribers = handlers.len(),
                "Broadcasting process signal"
            );
            for handler in handlers {
                handler(signal);
            }
        }

        if let Some(code) = signal.exit_code() {
            info!(signal = signal.name(), code, "Exiting after signal");
            let exit = self.exit.lock().unwrap_or_else(|e| e.into_inner()).clone();
            exit(code);
        }
    }

    pub fn notify_exit(&self) {
        self.dispatch(ProcessSignal::Exiting);
    }

    fn ensure_listening(self: &Arc<Self>) {
        let mut upstream = self.upstream.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(*upstream, Upstream::Idle) {
            return;
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let broadcaster = Arc::downgrade(self);
        let spawned = std::thread::Builder::new()
            .name("devtools-signals".to_string())
            .spawn(move || run_listener(broadcaster, ready_tx));
        if let Err(e) = spawned {
            warn!("Failed to start the signal listener thread: {}", e);
            *upstream = Upstream::Unavailable;
            return;
        }

        // Subscribers rely on the handlers as soon as `subscribe` returns
        *upstream = match ready_rx.recv() {
            Ok(Ok(())) => Upstream::Listening,
            Ok(Err(e)) => {
                warn!("Failed to install signal listeners: {}", e);
                Upstream::Unavailable
            }
            Err(_) => {
                warn!("Signal listener thread stopped during startup");
                Upstream::Unavailable
            }
        };
    }
}

fn run_listener(broadcaster: Weak<SignalBroadcaster>, ready: ReadySender) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    runtime.block_on(listen(broadcaster, ready));
}

#[cfg(unix)]
async fn listen(broadcaster: Weak<SignalBroadcaster>, ready: ReadySender) {
    use tokio::signal::unix::{SignalKind, signal};

    let installed = (|| {
        Ok::<_, io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        ))
    })();
    let (mut sigint, mut sigterm, mut sighup) = match installed {
        Ok(streams) => streams,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    info!("Installed SIGINT, SIGTERM and SIGHUP listeners");
    let _ = ready.send(Ok(()));

    loop {
        let signal = tokio::select! {
            _ = sigint.recv() => ProcessSignal::Interrupt,
            _ = sigterm.recv() => ProcessSignal::Terminate,
            _ = sighup.recv() => ProcessSignal::Hangup,
        };
        let Some(broadcaster) = broadcaster.upgrade() else {
            return;
        };
        broadcaster.dispatch(signal);
    }
}

#[cfg(windows)]
async fn listen(broadcaster: Weak<SignalBroadcaster>, ready: ReadySender) {
    use tokio::signal::windows::{ctrl_c, ctrl_close, ctrl_shutdown};

    let installed = (|| Ok::<_, io::Error>((ctrl_c()?, ctrl_close()?, ctrl_shutdown()?)))();
    let (mut interrupt, mut close, mut shutdown) = match installed {
        Ok(streams) => streams,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    info!("Installed Ctrl-C, close and shutdown listeners");
    let _ = ready.send(Ok(()));

    loop {
        let event = tokio::select! {
            _ = interrupt.recv() => ConsoleEvent::CtrlC,
            _ = close.recv() => ConsoleEvent::Close,
            _ = shutdown.recv() => ConsoleEvent::Shutdown,
        };
        let Some(broadcaster) = broadcaster.upgrade() else {
            return;
        };
        broadcaster.dispatch(event.signal());
    }
}

/// Windows console control events
#[cfg(any(windows, test))]
#[derive(Debug, Clone, Copy)]
enum ConsoleEvent {
    CtrlC,
    Close,
    Shutdown,
}

#[cfg(any(windows, test))]
impl ConsoleEvent {
    fn signal(self) -> ProcessSignal {
        match self {
            ConsoleEvent::CtrlC => ProcessSignal::Interrupt,
            ConsoleEvent::Close => ProcessSignal::Hangup,
            ConsoleEvent::Shutdown => ProcessSignal::Terminate,
        }
    }
}

/// Handle to one registered handler. Released on drop.
pub struct Subscription {
    id: u64,
    signal: ProcessSignal,
    broadcaster: Weak<SignalBroadcaster>,
    released: AtomicBool,
}

impl Subscription {
    pub fn signal(&self) -> ProcessSignal {
        self.signal
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Remove the handler. Releasing twice is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
            debug!(signal = self.signal.name(), id = self.id, "Signal subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_broadcaster() -> (Arc<SignalBroadcaster>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exit_log = log.clone();
        let broadcaster = SignalBroadcaster::detached(move |code| {
            exit_log.lock().unwrap().push(format!("exit:{code}"));
        });
        (broadcaster, log)
    }

    #[test]
    fn test_fan_out_in_registration_order_before_exit() {
        let (broadcaster, log) = recording_broadcaster();
        let subscriptions: Vec<_> = (0..5)
            .map(|i| {
                let log = log.clone();
                broadcaster.subscribe(ProcessSignal::Terminate, move |signal| {
                    log.lock().unwrap().push(format!("{i}:{}", signal.name()));
                })
            })
            .collect();

        broadcaster.dispatch(ProcessSignal::Terminate);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "0:SIGTERM",
                "1:SIGTERM",
                "2:SIGTERM",
                "3:SIGTERM",
                "4:SIGTERM",
                "exit:15"
            ]
        );
        drop(subscriptions);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_only_matching_signal_handlers_run() {
        let (broadcaster, log) = recording_broadcaster();
        let sigint_log = log.clone();
        let _a = broadcaster.subscribe(ProcessSignal::Interrupt, move |_| {
            sigint_log.lock().unwrap().push("sigint".to_string());
        });
        let hup_log = log.clone();
        let _b = broadcaster.subscribe(ProcessSignal::Hangup, move |_| {
            hup_log.lock().unwrap().push("sighup".to_string());
        });

        broadcaster.dispatch(ProcessSignal::Hangup);
        assert_eq!(*log.lock().unwrap(), vec!["sighup", "exit:1"]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProcessSignal::Interrupt.exit_code(), Some(2));
        assert_eq!(ProcessSignal::Terminate.exit_code(), Some(15));
        assert_eq!(ProcessSignal::Hangup.exit_code(), Some(1));
        assert_eq!(ProcessSignal::Exiting.exit_code(), None);
    }

    #[test]
    fn test_console_events_map_to_termination_tiers() {
        assert_eq!(ConsoleEvent::CtrlC.signal(), ProcessSignal::Interrupt);
        assert_eq!(ConsoleEvent::Close.signal(), ProcessSignal::Hangup);
        assert_eq!(ConsoleEvent::Shutdown.signal(), ProcessSignal::Terminate);
        assert_eq!(ConsoleEvent::Close.signal().exit_code(), Some(1));
    }

    #[test]
    fn test_notify_exit_does_not_terminate() {
        let (broadcaster, log) = recording_broadcaster();
        let exit_log = log.clone();
        let _sub = broadcaster.subscribe(ProcessSignal::Exiting, move |_| {
            exit_log.lock().unwrap().push("exiting".to_string());
        });

        broadcaster.notify_exit();
        assert_eq!(*log.lock().unwrap(), vec!["exiting"]);
    }

    #[test]
    fn test_signal_after_broadcast_still_exits() {
        let (broadcaster, log) = recording_broadcaster();
        let handler_log = log.clone();
        let _sub = broadcaster.subscribe(ProcessSignal::Interrupt, move |_| {
            handler_log.lock().unwrap().push("sigint".to_string());
        });

        broadcaster.notify_exit();
        broadcaster.dispatch(ProcessSignal::Interrupt);

        assert_eq!(*log.lock().unwrap(), vec!["exit:2"]);
    }

    #[test]
    fn test_exit_handler_can_be_replaced() {
        let (broadcaster, log) = recording_broadcaster();
        let replaced = log.clone();
        broadcaster.set_exit_handler(move |code| {
            replaced.lock().unwrap().push(format!("replaced:{code}"));
        });

        broadcaster.dispatch(ProcessSignal::Hangup);
        assert_eq!(*log.lock().unwrap(), vec!["replaced:1"]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (broadcaster, _log) = recording_broadcaster();
        let first = broadcaster.subscribe(ProcessSignal::Interrupt, |_| {});
        let _second = broadcaster.subscribe(ProcessSignal::Interrupt, |_| {});
        assert_eq!(broadcaster.subscriber_count(), 2);

        first.release();
        first.release();
        assert!(first.is_released());
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(first);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_handler_may_release_subscriptions_during_dispatch() {
        let (broadcaster, log) = recording_broadcaster();
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let releaser = held.clone();
        let first_log = log.clone();
        let first = broadcaster.subscribe(ProcessSignal::Interrupt, move |_| {
            first_log.lock().unwrap().push("first".to_string());
            for sub in releaser.lock().unwrap().drain(..) {
                sub.release();
            }
        });
        let second_log = log.clone();
        let second = broadcaster.subscribe(ProcessSignal::Interrupt, move |_| {
            second_log.lock().unwrap().push("second".to_string());
        });
        held.lock().unwrap().extend([first, second]);

        broadcaster.dispatch(ProcessSignal::Interrupt);

        // Second handler was already snapshotted when the first released it
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "exit:2"]);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_many_subscribers() {
        let (broadcaster, _log) = recording_broadcaster();
        let count = Arc::new(AtomicU64::new(0));
        let subscriptions: Vec<_> = (0..1000)
            .map(|_| {
                let count = count.clone();
                broadcaster.subscribe(ProcessSignal::Exiting, move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        broadcaster.notify_exit();
        assert_eq!(count.load(Ordering::SeqCst), 1000);
        drop(subscriptions);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_broadcaster() {
        let (broadcaster, _log) = recording_broadcaster();
        let subscription = broadcaster.subscribe(ProcessSignal::Hangup, |_| {});
        drop(broadcaster);
        subscription.release();
        assert!(subscription.is_released());
    }
}
