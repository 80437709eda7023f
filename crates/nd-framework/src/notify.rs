//! Change notification plumbing.
//!
//! Change sources are one-shot: once a source fires it stays quiet until it
//! is re-armed. The registry re-arms a source before acting on its event, so
//! changes that land while an event is being processed either get absorbed
//! by that processing or fire the freshly armed source again.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Receiver, Sender, unbounded};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use nd_types::NdResult;

/// What changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ChangeKind {
    ProviderCatalog = 1,
    AddressList = 2,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::ProviderCatalog => write!(f, "provider catalog"),
            ChangeKind::AddressList => write!(f, "address list"),
        }
    }
}

/// Pending change events, drained without blocking.
pub struct EventQueue {
    tx: Sender<ChangeKind>,
    rx: Receiver<ChangeKind>,
}

impl EventQueue {
    pub fn new() -> EventQueue {
        let (tx, rx) = unbounded();
        EventQueue { tx, rx }
    }

    pub fn post(&self, kind: ChangeKind) {
        let _ = self.tx.send(kind);
    }

    /// The next pending event, or `None` when the queue is idle.
    pub fn try_next(&self) -> Option<ChangeKind> {
        self.rx.try_recv().ok()
    }

    /// A handle change sources use to post events of one kind.
    pub fn notifier(&self, kind: ChangeKind) -> Notifier {
        Notifier { tx: self.tx.clone(), kind }
    }
}

impl Default for EventQueue {
    fn default() -> EventQueue {
        EventQueue::new()
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: Sender<ChangeKind>,
    kind: ChangeKind,
}

impl Notifier {
    pub fn notify(&self) {
        let _ = self.tx.send(self.kind);
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }
}

/// A one-shot change source that must be re-armed after each event.
pub trait ChangeMonitor: Send + Sync {
    fn arm(&self) -> NdResult<()>;
}

/// Monitor for wirings that have no change source of their own.
/// Arming succeeds and nothing ever fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl ChangeMonitor for NullMonitor {
    fn arm(&self) -> NdResult<()> {
        Ok(())
    }
}

fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Watches one file's modification time from a background thread and posts
/// a single event per arm when it changes. Appearing and disappearing count
/// as changes. Changes seen while unarmed are recorded but not reported.
pub struct PollingFileMonitor {
    armed: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollingFileMonitor {
    pub fn spawn(path: PathBuf, interval: Duration, notifier: Notifier) -> PollingFileMonitor {
        let armed = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_armed = armed.clone();
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            let mut last = modified_at(&path);
            while !thread_stop.load(Ordering::Relaxed) {
                let current = modified_at(&path);
                if current != last {
                    last = current;
                    if thread_armed.swap(false, Ordering::AcqRel) {
                        tracing::debug!("Change detected on {}", path.display());
                        notifier.notify();
                    }
                }
                sleep_unless_stopped(&thread_stop, interval);
            }
        });

        PollingFileMonitor { armed, stop, handle: Some(handle) }
    }
}

impl ChangeMonitor for PollingFileMonitor {
    fn arm(&self) -> NdResult<()> {
        self.armed.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for PollingFileMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Sleeps `total` in short steps so a stop request is honored promptly.
fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(20);
    let mut remaining = total;
    while !stop.load(Ordering::Relaxed) && remaining > Duration::ZERO {
        let nap = remaining.min(step);
        std::thread::sleep(nap);
        remaining -= nap;
    }
}
