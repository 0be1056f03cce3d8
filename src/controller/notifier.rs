//! One-way status channel from the controller to its observer.
//!
//! Events are queued on an unbounded channel and delivered in emission
//! order by a dispatcher thread, so the controller never waits on a slow
//! observer.

use std::fmt;
use std::thread::{JoinHandle, ThreadId};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::camera::error::{CaptureError, Result};

/// Coarse lifecycle events reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Initializing,
    Initialized,
    Started,
    /// Stop requested; the dataset is being flushed.
    Finalizing,
    Stopped,
    /// The dataset writer finished and its manifest is on disk.
    Completed,
    ErrorCameraUnplugged,
    ErrorDeviceUnavailable,
    ErrorStorageUnavailable,
    /// Free-text diagnostics only.
    Info,
}

impl Status {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrorCameraUnplugged | Self::ErrorDeviceUnavailable | Self::ErrorStorageUnavailable
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A status paired with its human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub status: Status,
    pub description: String,
}

/// Observer callback. Arguments: status, description.
pub type Observer = Box<dyn Fn(Status, &str) + Send>;

enum Message {
    Event(StatusEvent),
    Shutdown,
}

/// Cloneable handle for emitting events from any thread.
#[derive(Clone)]
pub struct StatusSender {
    tx: UnboundedSender<Message>,
}

impl StatusSender {
    /// Queue an event. Events sent after the notifier shut down are dropped.
    pub fn notify(&self, status: Status, description: impl Into<String>) {
        let event = StatusEvent {
            status,
            description: description.into(),
        };
        debug!("status {}: {}", event.status, event.description);
        if self.tx.send(Message::Event(event)).is_err() {
            debug!("status dropped, notifier is shut down");
        }
    }
}

/// Owns the dispatcher thread that calls the observer.
pub struct StatusNotifier {
    sender: StatusSender,
    dispatcher: Option<JoinHandle<()>>,
    dispatcher_id: ThreadId,
}

impl StatusNotifier {
    /// Start a dispatcher delivering events to `observer`.
    pub fn spawn(observer: Observer) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = std::thread::Builder::new()
            .name("status-dispatch".to_string())
            .spawn(move || dispatch(rx, observer))
            .map_err(|e| CaptureError::Spawn(format!("status dispatcher: {e}")))?;
        let dispatcher_id = dispatcher.thread().id();

        Ok(Self {
            sender: StatusSender { tx },
            dispatcher: Some(dispatcher),
            dispatcher_id,
        })
    }

    pub fn sender(&self) -> StatusSender {
        self.sender.clone()
    }

    pub fn notify(&self, status: Status, description: impl Into<String>) {
        self.sender.notify(status, description);
    }

    /// Deliver everything queued so far, then stop the dispatcher.
    ///
    /// Called from inside the observer this only requests the stop.
    pub fn shutdown(&mut self) {
        let _ = self.sender.tx.send(Message::Shutdown);
        if std::thread::current().id() == self.dispatcher_id {
            self.dispatcher.take();
            return;
        }
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                warn!("status observer panicked");
            }
        }
    }

    /// Stop accepting events and let the dispatcher finish its queue on
    /// its own thread. Returns without waiting for the observer.
    pub fn detach(mut self) {
        let _ = self.sender.tx.send(Message::Shutdown);
        self.dispatcher.take();
    }
}

impl Drop for StatusNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(mut rx: UnboundedReceiver<Message>, observer: Observer) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Event(event) => observer(event.status, &event.description),
            Message::Shutdown => break,
        }
    }
    debug!("status dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recording() -> (Observer, Arc<Mutex<Vec<StatusEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let observer: Observer = Box::new(move |status, description| {
            sink.lock().unwrap().push(StatusEvent {
                status,
                description: description.to_string(),
            });
        });
        (observer, events)
    }

    #[test]
    fn events_arrive_in_emission_order() {
        let (observer, events) = recording();
        let mut notifier = StatusNotifier::spawn(observer).unwrap();

        notifier.notify(Status::Initializing, "a");
        notifier.notify(Status::Initialized, "b");
        notifier.notify(Status::Started, "c");
        notifier.shutdown();

        let statuses: Vec<Status> = events.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![Status::Initializing, Status::Initialized, Status::Started]
        );
        assert_eq!(events.lock().unwrap()[2].description, "c");
    }

    #[test]
    fn slow_observer_does_not_block_sender() {
        let observer: Observer = Box::new(|_, _| std::thread::sleep(Duration::from_millis(50)));
        let notifier = StatusNotifier::spawn(observer).unwrap();

        let begin = std::time::Instant::now();
        for _ in 0..10 {
            notifier.notify(Status::Info, "tick");
        }
        assert!(begin.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn cloned_senders_share_one_ordered_stream() {
        let (observer, events) = recording();
        let mut notifier = StatusNotifier::spawn(observer).unwrap();
        let sender = notifier.sender();

        let worker = std::thread::spawn(move || {
            sender.notify(Status::ErrorStorageUnavailable, "disk full");
        });
        worker.join().unwrap();
        notifier.notify(Status::Stopped, "done");
        notifier.shutdown();

        let statuses: Vec<Status> = events.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![Status::ErrorStorageUnavailable, Status::Stopped]
        );
    }

    #[test]
    fn notify_after_shutdown_is_dropped() {
        let (observer, events) = recording();
        let mut notifier = StatusNotifier::spawn(observer).unwrap();
        let sender = notifier.sender();
        notifier.shutdown();

        sender.notify(Status::Info, "late");
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn detach_leaves_queued_events_to_the_dispatcher() {
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        let observer: Observer = Box::new(move |status, _| {
            std::thread::sleep(Duration::from_millis(100));
            let _ = tx.lock().unwrap().send(status);
        });
        let notifier = StatusNotifier::spawn(observer).unwrap();
        let sender = notifier.sender();
        notifier.notify(Status::Finalizing, "a");
        notifier.notify(Status::Stopped, "b");

        let begin = std::time::Instant::now();
        notifier.detach();
        assert!(begin.elapsed() < Duration::from_millis(100));

        sender.notify(Status::Info, "late");
        let wait = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(wait).unwrap(), Status::Finalizing);
        assert_eq!(rx.recv_timeout(wait).unwrap(), Status::Stopped);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn error_statuses_are_flagged() {
        assert!(Status::ErrorCameraUnplugged.is_error());
        assert!(Status::ErrorStorageUnavailable.is_error());
        assert!(!Status::Completed.is_error());
        assert!(!Status::Info.is_error());
    }
}
