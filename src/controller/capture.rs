//! Capture controller: lifecycle state machine and acquisition loop.
//!
//! Lock order is `lifecycle` → `acquisition` → `preview` / `state`. The
//! lifecycle guard is taken with `try_lock` so a second lifecycle call
//! arriving while one is in flight is rejected instead of queued.
//! Acquisition ticks hold the `acquisition` lock for one device poll, which
//! is how `stop` waits out the in-flight tick. A tick checks the state
//! before taking that lock, so it never waits behind a lifecycle call.
//! Dataset folders are cleared and flushed outside the lock.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::camera::backend::DepthCamera;
use crate::camera::error::{CaptureError, Result};
use crate::camera::session::DeviceSession;
use crate::camera::types::{DeviceInfo, SharedFramePair};
use crate::controller::notifier::{Observer, Status, StatusNotifier};
use crate::controller::state::LifecycleState;
use crate::dataset::target::CaptureTarget;
use crate::dataset::writer::{DatasetWriter, WriteErrorCallback};
use crate::diagnostics::stats::{CaptureSnapshot, CaptureStats};
use crate::preview::render::{FramePipeline, RenderedImage, RenderedImagePair};
use crate::preview::slot::ImageSlot;
use crate::settings::types::{CaptureSettings, FrameDrive};

/// Result of one acquisition tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Frame,
    Empty,
    /// The controller left `Started`; the loop must exit.
    Halted,
}

/// Device and dataset, guarded by one lock held across a poll.
struct Acquisition {
    session: DeviceSession,
    writer: Option<DatasetWriter>,
}

/// The last pulled pair and the device it came from.
#[derive(Default)]
struct Preview {
    device: Option<Arc<DeviceInfo>>,
    latest: Option<SharedFramePair>,
    /// Whether `latest` has already been published to the image slot.
    rendered: bool,
}

struct Inner {
    settings: CaptureSettings,
    lifecycle: Mutex<()>,
    state: Mutex<LifecycleState>,
    acquisition: Mutex<Acquisition>,
    preview: Mutex<Preview>,
    pipeline: FramePipeline,
    /// Consulted at the top of every worker iteration.
    enabled: AtomicBool,
    /// Frames handed to the dataset writer since the last start.
    queued: AtomicU64,
    images: ImageSlot,
    stats: Arc<Mutex<CaptureStats>>,
    notifier: Mutex<Option<StatusNotifier>>,
    target: Mutex<Option<CaptureTarget>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Drives one depth camera through its capture lifecycle.
///
/// Lifecycle calls return `Err` only for `InvalidState` (or a failed
/// thread spawn). Device and storage failures are reported through the
/// observer and reflected in [`state`](Self::state).
pub struct CaptureController {
    inner: Arc<Inner>,
}

impl CaptureController {
    pub fn new(camera: Arc<dyn DepthCamera>, settings: CaptureSettings) -> Self {
        let pipeline = FramePipeline::new(settings.depth_range, settings.depth_view);
        let session = DeviceSession::new(camera, settings.profile);
        Self {
            inner: Arc::new(Inner {
                settings,
                lifecycle: Mutex::new(()),
                state: Mutex::new(LifecycleState::Uninitialized),
                acquisition: Mutex::new(Acquisition {
                    session,
                    writer: None,
                }),
                preview: Mutex::new(Preview::default()),
                pipeline,
                enabled: AtomicBool::new(false),
                queued: AtomicU64::new(0),
                images: ImageSlot::new(),
                stats: Arc::new(Mutex::new(CaptureStats::new())),
                notifier: Mutex::new(None),
                target: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Register `observer` and open the device.
    pub fn initialize<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(Status, &str) + Send + 'static,
    {
        self.initialize_inner(None, Box::new(observer))
    }

    /// Like [`initialize`](Self::initialize), also setting the dataset
    /// target used by a later plain [`start`](Self::start).
    pub fn initialize_with_target<F>(&self, target: &str, observer: F) -> Result<()>
    where
        F: Fn(Status, &str) + Send + 'static,
    {
        self.initialize_inner(Some(CaptureTarget::new(target)), Box::new(observer))
    }

    /// Start acquiring. Records a dataset only if `initialize_with_target`
    /// supplied a target.
    pub fn start(&self) -> Result<()> {
        self.start_inner(None)
    }

    /// Start acquiring and record to `target` (blank means `testdata`).
    pub fn start_with_target(&self, target: &str) -> Result<()> {
        self.start_inner(Some(CaptureTarget::new(target)))
    }

    /// Halt the loop, flush the dataset and release the device.
    pub fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle_guard("stop")?;
        self.inner.transition("stop", LifecycleState::can_stop, LifecycleState::Stopping)?;
        self.inner.emit(Status::Finalizing, "stopping capture");

        self.inner.enabled.store(false, Ordering::Release);
        self.join_worker();

        let writer = {
            let mut acq = self.inner.acquisition.lock();
            acq.session.close();
            acq.writer.take()
        };
        if let Some(mut writer) = writer {
            self.inner.finish_dataset(&mut writer);
        }
        self.inner.set_state(LifecycleState::Stopped);

        info!("capture stopped");
        self.inner.emit(Status::Stopped, "capture stopped");
        Ok(())
    }

    /// One acquisition tick: pull at most one frame pair.
    ///
    /// Returns `false` when no new pair arrived, when not started, or when
    /// the device was lost (the controller is then in `Error`). Outside
    /// `Started` this returns without touching the device.
    pub fn process_frame(&self) -> bool {
        self.inner.tick() == Tick::Frame
    }

    /// Render the most recently pulled pair. Returns whether a new pair was
    /// published; repeated calls without a new frame do nothing.
    pub fn process_bitmap_image(&self) -> bool {
        self.inner.render()
    }

    /// Latest rendered color image.
    pub fn color_bitmap(&self) -> Option<Arc<RenderedImage>> {
        self.inner.images.color()
    }

    /// Latest rendered depth image.
    pub fn depth_bitmap(&self) -> Option<Arc<RenderedImage>> {
        self.inner.images.depth()
    }

    /// Both rendered images from the same tick.
    pub fn rendered_pair(&self) -> Option<Arc<RenderedImagePair>> {
        self.inner.images.latest()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// The dataset target currently in effect, if recording is configured.
    pub fn capture_target(&self) -> Option<CaptureTarget> {
        self.inner.target.lock().clone()
    }

    /// Folder the current target resolves to. `None` if there is no
    /// target or it does not name a folder inside the dataset root.
    pub fn dataset_folder(&self) -> Option<PathBuf> {
        self.capture_target()
            .and_then(|t| t.resolve(&self.inner.settings.dataset_root).ok())
    }

    /// Info reported by the device at the last successful open.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.preview.lock().device.as_deref().cloned()
    }

    pub fn diagnostics(&self) -> CaptureSnapshot {
        let queued = self.inner.queued.load(Ordering::Acquire);
        self.inner.stats.lock().snapshot(queued)
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.inner.settings
    }

    fn lifecycle_guard(&self, operation: &'static str) -> Result<MutexGuard<'_, ()>> {
        self.inner
            .lifecycle
            .try_lock()
            .ok_or_else(|| CaptureError::InvalidState {
                operation,
                state: self.inner.state(),
            })
    }

    fn initialize_inner(&self, target: Option<CaptureTarget>, observer: Observer) -> Result<()> {
        let _guard = self.lifecycle_guard("initialize")?;

        let state = self.inner.state();
        if state == LifecycleState::Initialized {
            debug!("initialize ignored, already initialized");
            return Ok(());
        }
        if !state.can_initialize() {
            return Err(CaptureError::InvalidState {
                operation: "initialize",
                state,
            });
        }

        let notifier = StatusNotifier::spawn(observer)?;
        let previous = self.inner.notifier.lock().replace(notifier);
        // The old observer drains its queue on its own thread.
        if let Some(previous) = previous {
            previous.detach();
        }
        *self.inner.target.lock() = target;

        self.inner.set_state(LifecycleState::Initializing);
        self.inner.emit(Status::Initializing, "opening device");

        let mut acq = self.inner.acquisition.lock();
        match self.inner.open_session(&mut acq) {
            Ok(info) => {
                self.inner.set_state(LifecycleState::Initialized);
                drop(acq);
                self.inner.emit(
                    Status::Initialized,
                    format!("{} (serial {})", info.name, info.serial),
                );
            }
            Err(e) => {
                warn!("device open failed: {e}");
                self.inner.set_state(LifecycleState::Error);
                drop(acq);
                self.inner.emit(Status::ErrorDeviceUnavailable, e.to_string());
            }
        }
        Ok(())
    }

    fn start_inner(&self, target: Option<CaptureTarget>) -> Result<()> {
        let _guard = self.lifecycle_guard("start")?;

        let state = self.inner.state();
        if !state.can_start() {
            return Err(CaptureError::InvalidState {
                operation: "start",
                state,
            });
        }
        // A worker that exited on device loss is still joinable.
        self.join_worker();

        let target = {
            let mut current = self.inner.target.lock();
            if target.is_some() {
                *current = target;
            }
            current.clone()
        };

        let opened = {
            let mut acq = self.inner.acquisition.lock();
            self.inner.open_session(&mut acq)
        };
        let info = match opened {
            Ok(info) => info,
            Err(e) => {
                warn!("device open failed: {e}");
                self.inner.set_state(LifecycleState::Error);
                self.inner.emit(Status::ErrorDeviceUnavailable, e.to_string());
                return Ok(());
            }
        };

        self.inner.stats.lock().reset();
        self.inner.queued.store(0, Ordering::Release);
        {
            let mut preview = self.inner.preview.lock();
            preview.latest = None;
            preview.rendered = false;
        }

        // Ticks return early until the state is `Started`, so the folder
        // can be cleared without holding the acquisition lock.
        let mut description = "preview only".to_string();
        let writer = match &target {
            Some(target) => match self.inner.open_dataset(target, &info) {
                Ok(writer) => {
                    description = format!("recording to {}", writer.folder().display());
                    Some(writer)
                }
                Err(e) => {
                    // Preview keeps running without a dataset.
                    warn!("dataset unavailable: {e}");
                    self.inner.emit(Status::ErrorStorageUnavailable, e.to_string());
                    None
                }
            },
            None => None,
        };

        {
            let mut acq = self.inner.acquisition.lock();
            acq.writer = writer;
            self.inner.set_state(LifecycleState::Started);
            self.inner.enabled.store(true, Ordering::Release);
        }

        info!("capture started, {description}");
        self.inner.emit(Status::Started, description);

        if self.inner.settings.drive == FrameDrive::Background {
            if let Err(e) = self.spawn_worker() {
                self.rollback_start(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo a start whose acquisition loop never ran.
    fn rollback_start(&self, error: &CaptureError) {
        warn!("start rolled back: {error}");
        self.inner.enabled.store(false, Ordering::Release);
        let writer = {
            let mut acq = self.inner.acquisition.lock();
            acq.session.close();
            acq.writer.take()
        };
        if let Some(mut writer) = writer {
            self.inner.finish_dataset(&mut writer);
        }
        self.inner.set_state(LifecycleState::Stopped);
        self.inner.emit(Status::Stopped, error.to_string());
    }

    fn spawn_worker(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("rsds-acquire".to_string())
            .spawn(move || run_loop(&inner))
            .map_err(|e| CaptureError::Spawn(format!("acquisition loop: {e}")))?;
        *self.inner.worker.lock() = Some(handle);
        Ok(())
    }

    fn join_worker(&self) {
        let Some(handle) = self.inner.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("acquisition loop panicked");
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Started {
            if let Err(e) = self.stop() {
                warn!("stop on drop failed: {e}");
            }
        }
        self.inner.enabled.store(false, Ordering::Release);
        self.join_worker();
        self.inner.acquisition.lock().session.close();
        // Dropping the notifier delivers any queued events first.
        let notifier = self.inner.notifier.lock().take();
        drop(notifier);
    }
}

impl Inner {
    fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("lifecycle {} -> {next}", *state);
            *state = next;
        }
    }

    /// Move to `next` if `allowed` accepts the current state.
    fn transition(
        &self,
        operation: &'static str,
        allowed: fn(LifecycleState) -> bool,
        next: LifecycleState,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !allowed(*state) {
            return Err(CaptureError::InvalidState {
                operation,
                state: *state,
            });
        }
        debug!("lifecycle {} -> {next}", *state);
        *state = next;
        Ok(())
    }

    fn emit(&self, status: Status, description: impl Into<String>) {
        match self.notifier.lock().as_ref() {
            Some(notifier) => notifier.notify(status, description),
            None => debug!("no observer for status {status}"),
        }
    }

    fn write_error_callback(&self) -> Option<WriteErrorCallback> {
        let sender = self.notifier.lock().as_ref()?.sender();
        Some(Arc::new(move |message: &str| {
            sender.notify(
                Status::ErrorStorageUnavailable,
                format!("dataset write failed: {message}"),
            );
        }))
    }

    fn open_session(&self, acq: &mut Acquisition) -> Result<DeviceInfo> {
        let info = acq.session.open()?.info().clone();
        self.preview.lock().device = Some(Arc::new(info.clone()));
        Ok(info)
    }

    fn open_dataset(&self, target: &CaptureTarget, info: &DeviceInfo) -> Result<DatasetWriter> {
        let folder = target.resolve(&self.settings.dataset_root)?;
        DatasetWriter::open(
            &folder,
            info,
            self.settings.write_queue_depth,
            Arc::clone(&self.stats),
            self.write_error_callback(),
        )
    }

    /// Flush `writer` and report how the dataset ended.
    fn finish_dataset(&self, writer: &mut DatasetWriter) {
        match writer.close() {
            Ok(manifest) => self.emit(
                Status::Completed,
                format!(
                    "{} frames written to {}",
                    manifest.frames_written,
                    writer.folder().display()
                ),
            ),
            Err(e) => self.emit(Status::ErrorStorageUnavailable, e.to_string()),
        }
    }

    fn tick(&self) -> Tick {
        if self.state() != LifecycleState::Started {
            return Tick::Halted;
        }
        let mut acq = self.acquisition.lock();
        // A lifecycle call may have run while this tick waited for the lock.
        if self.state() != LifecycleState::Started {
            return Tick::Halted;
        }

        match acq.session.pull_frame(self.settings.poll_timeout()) {
            Ok(Some(frame)) => {
                self.stats.lock().record_acquired();
                let frame = Arc::new(frame);
                let appended = acq.writer.as_mut().map(|w| w.append(Arc::clone(&frame)));
                match appended {
                    Some(Ok(())) => {
                        self.queued.fetch_add(1, Ordering::AcqRel);
                    }
                    Some(Err(e)) => {
                        warn!("dropping dataset after append failure: {e}");
                        acq.writer = None;
                        self.emit(Status::ErrorStorageUnavailable, e.to_string());
                    }
                    None => {}
                }
                let mut preview = self.preview.lock();
                preview.latest = Some(frame);
                preview.rendered = false;
                Tick::Frame
            }
            Ok(None) => {
                self.stats.lock().record_empty_poll();
                Tick::Empty
            }
            Err(e) => {
                self.handle_device_lost(&mut acq, &e);
                Tick::Halted
            }
        }
    }

    /// Release everything after the device went away mid-session.
    fn handle_device_lost(&self, acq: &mut Acquisition, error: &CaptureError) {
        {
            let mut state = self.state.lock();
            // A concurrent stop owns the teardown.
            if *state != LifecycleState::Started {
                return;
            }
            *state = LifecycleState::Error;
        }
        self.enabled.store(false, Ordering::Release);
        warn!("device lost: {error}");

        if let Some(mut writer) = acq.writer.take() {
            if let Err(e) = writer.close() {
                warn!("closing dataset after device loss failed: {e}");
            }
        }
        acq.session.close();
        self.preview.lock().latest = None;
        self.emit(Status::ErrorCameraUnplugged, error.to_string());
    }

    fn render(&self) -> bool {
        let (frame, device) = {
            let mut preview = self.preview.lock();
            if preview.rendered {
                return false;
            }
            let (Some(frame), Some(device)) = (preview.latest.clone(), preview.device.clone())
            else {
                return false;
            };
            preview.rendered = true;
            (frame, device)
        };

        let pair = self.pipeline.process(&frame, &device);

        let mut stats = self.stats.lock();
        stats.record_rendered();
        if pair.depth_valid == Some(false) {
            stats.record_invalid_depth();
            debug!("frame {} failed the proximity check", pair.sequence);
        }
        drop(stats);

        self.images.publish(pair);
        true
    }
}

/// Worker body for `FrameDrive::Background`.
fn run_loop(inner: &Inner) {
    debug!("acquisition loop running");
    while inner.enabled.load(Ordering::Acquire) {
        match inner.tick() {
            Tick::Frame => {
                inner.render();
            }
            Tick::Empty => std::thread::sleep(inner.settings.idle_interval()),
            Tick::Halted => break,
        }
    }
    debug!("acquisition loop exited");
}
