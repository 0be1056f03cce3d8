//! Sequential PNG dataset recording.
//!
//! Layout of a dataset folder:
//!
//! ```text
//! <target>/camera.json        device info and calibration
//! <target>/rgb/000000.png     RGB8 color
//! <target>/depth/000000.png   16-bit depth in 0.1 mm
//! <target>/manifest.json      written on close
//! ```
//!
//! Frames are encoded on a dedicated thread fed by a bounded queue. When
//! the queue is full `append` blocks until the writer catches up; frames
//! are never dropped.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use image::{ImageBuffer, ImageFormat, Luma, Rgb};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{DeviceInfo, SharedFramePair};
use crate::diagnostics::stats::CaptureStats;
use crate::preview::colorize::depth_to_tenth_mm;
use crate::preview::render::FramePipeline;

const COLOR_DIR: &str = "rgb";
const DEPTH_DIR: &str = "depth";
const CAMERA_FILE: &str = "camera.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Callback for reporting write failures. Argument: error message.
pub type WriteErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Summary written to `manifest.json` when a dataset is closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetManifest {
    pub frames_written: u64,
    pub write_failures: u64,
    pub first_timestamp_us: Option<u64>,
    pub last_timestamp_us: Option<u64>,
    pub color_dir: String,
    pub depth_dir: String,
    pub depth_units: String,
}

/// Append-only writer for one dataset folder.
pub struct DatasetWriter {
    folder: PathBuf,
    tx: Option<mpsc::Sender<SharedFramePair>>,
    worker: Option<JoinHandle<DatasetManifest>>,
    queued: u64,
    stats: Arc<Mutex<CaptureStats>>,
    manifest: Option<DatasetManifest>,
}

impl DatasetWriter {
    /// Create (or recreate) the dataset folder and start the writer thread.
    ///
    /// Any previous contents of `folder` are removed.
    pub fn open(
        folder: &Path,
        device: &DeviceInfo,
        queue_depth: usize,
        stats: Arc<Mutex<CaptureStats>>,
        on_error: Option<WriteErrorCallback>,
    ) -> Result<Self> {
        let storage = |what: &str, e: std::io::Error| {
            CaptureError::StorageUnavailable(format!("{what} {}: {e}", folder.display()))
        };

        // `/` or `x/..` would clear a folder the dataset does not own.
        let climbs = folder.components().any(|c| c == Component::ParentDir);
        if climbs || folder.file_name().is_none() {
            return Err(CaptureError::StorageUnavailable(format!(
                "refusing to use {} as a dataset folder",
                folder.display()
            )));
        }
        if folder.exists() {
            std::fs::remove_dir_all(folder).map_err(|e| storage("cannot clear", e))?;
        }
        std::fs::create_dir_all(folder.join(COLOR_DIR)).map_err(|e| storage("cannot create", e))?;
        std::fs::create_dir_all(folder.join(DEPTH_DIR)).map_err(|e| storage("cannot create", e))?;
        write_json_atomic(&folder.join(CAMERA_FILE), device)?;

        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = {
            let folder = folder.to_path_buf();
            let device = device.clone();
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("dataset-writer".to_string())
                .spawn(move || run_writer(&folder, &device, rx, &stats, on_error))
                .map_err(|e| CaptureError::Spawn(format!("dataset writer: {e}")))?
        };

        info!("dataset opened at {}", folder.display());

        Ok(Self {
            folder: folder.to_path_buf(),
            tx: Some(tx),
            worker: Some(worker),
            queued: 0,
            stats,
            manifest: None,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Frames accepted by `append` so far.
    pub fn queued(&self) -> u64 {
        self.queued
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue one frame pair for writing, blocking while the queue is full.
    pub fn append(&mut self, frame: SharedFramePair) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| CaptureError::StorageUnavailable("dataset is closed".to_string()))?;

        let closed = || CaptureError::StorageUnavailable("dataset writer stopped".to_string());

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.stats.lock().record_write_stall();
                debug!("dataset queue full, waiting for writer");
                tx.blocking_send(frame).map_err(|_| closed())?;
            }
            Err(TrySendError::Closed(_)) => return Err(closed()),
        }

        self.queued += 1;
        Ok(())
    }

    /// Flush pending frames, stop the writer thread and write the manifest.
    ///
    /// Safe to call more than once; later calls return the same manifest.
    pub fn close(&mut self) -> Result<DatasetManifest> {
        if let Some(manifest) = &self.manifest {
            return Ok(manifest.clone());
        }

        // Dropping the sender lets the writer drain the queue and exit.
        self.tx.take();
        let manifest = match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| {
                CaptureError::StorageUnavailable("dataset writer panicked".to_string())
            })?,
            None => DatasetManifest::default(),
        };

        self.manifest = Some(manifest.clone());
        write_json_atomic(&self.folder.join(MANIFEST_FILE), &manifest)?;
        info!(
            "dataset closed at {}: {} frames written, {} failed",
            self.folder.display(),
            manifest.frames_written,
            manifest.write_failures
        );
        Ok(manifest)
    }
}

impl Drop for DatasetWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing dataset on drop failed: {e}");
        }
    }
}

/// Writer thread: encode frames in arrival order until the sender is gone.
fn run_writer(
    folder: &Path,
    device: &DeviceInfo,
    mut rx: mpsc::Receiver<SharedFramePair>,
    stats: &Mutex<CaptureStats>,
    on_error: Option<WriteErrorCallback>,
) -> DatasetManifest {
    let mut manifest = DatasetManifest {
        color_dir: COLOR_DIR.to_string(),
        depth_dir: DEPTH_DIR.to_string(),
        depth_units: "0.1mm".to_string(),
        ..DatasetManifest::default()
    };
    let mut index: u64 = 0;

    while let Some(frame) = rx.blocking_recv() {
        match write_frame(folder, device, &frame, index) {
            Ok(()) => {
                manifest.frames_written += 1;
                manifest.first_timestamp_us.get_or_insert(frame.timestamp_us);
                manifest.last_timestamp_us = Some(frame.timestamp_us);
                stats.lock().record_written();
            }
            Err(e) => {
                manifest.write_failures += 1;
                stats.lock().record_write_failure();
                warn!("failed to write frame {index}: {e}");
                // Report the first failure only; the manifest has the total.
                if manifest.write_failures == 1 {
                    if let Some(cb) = &on_error {
                        cb(&e.to_string());
                    }
                }
            }
        }
        index += 1;
    }

    manifest
}

fn write_frame(
    folder: &Path,
    device: &DeviceInfo,
    frame: &SharedFramePair,
    index: u64,
) -> Result<()> {
    let name = format!("{index:06}.png");
    let storage = |e: image::ImageError| CaptureError::StorageUnavailable(e.to_string());
    let size_mismatch =
        || CaptureError::StorageUnavailable(format!("frame {index} buffer does not match its size"));

    let color = FramePipeline::render_color(&frame.color);
    let color_img: ImageBuffer<Rgb<u8>, _> =
        ImageBuffer::from_raw(color.width, color.height, color.data).ok_or_else(size_mismatch)?;
    color_img
        .save_with_format(folder.join(COLOR_DIR).join(&name), ImageFormat::Png)
        .map_err(storage)?;

    let depth = depth_to_tenth_mm(&frame.depth, device.depth_scale, device.device_type);
    let depth_img: ImageBuffer<Luma<u16>, _> =
        ImageBuffer::from_raw(depth.width, depth.height, depth.data).ok_or_else(size_mismatch)?;
    depth_img
        .save_with_format(folder.join(DEPTH_DIR).join(&name), ImageFormat::Png)
        .map_err(storage)?;

    Ok(())
}

/// Write `value` as pretty JSON via a temp file and rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let storage = |e: String| CaptureError::StorageUnavailable(format!("{}: {e}", path.display()));
    let json = serde_json::to_string_pretty(value).map_err(|e| storage(e.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(|e| storage(e.to_string()))?;
    std::fs::rename(&tmp_path, path).map_err(|e| storage(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::{
        ColorFormat, ColorFrame, DepthFrame, DeviceType, Extrinsics, FramePair, Intrinsics,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn device() -> DeviceInfo {
        let intr = Intrinsics {
            width: 4,
            height: 2,
            ppx: 2.0,
            ppy: 1.0,
            fx: 4.0,
            fy: 4.0,
        };
        DeviceInfo {
            name: "Intel RealSense D435".to_string(),
            serial: "0001".to_string(),
            device_type: DeviceType::D435,
            depth_scale: 10.0,
            color_intrinsics: intr,
            depth_intrinsics: intr,
            extrinsics: Extrinsics::default(),
        }
    }

    fn frame(n: u64) -> SharedFramePair {
        Arc::new(FramePair {
            sequence: n,
            timestamp_us: 1000 + n,
            color: ColorFrame {
                width: 4,
                height: 2,
                format: ColorFormat::Rgb8,
                data: vec![n as u8; 4 * 2 * 3],
            },
            depth: DepthFrame {
                width: 4,
                height: 2,
                data: vec![1000; 8],
            },
        })
    }

    fn open_in(dir: &TempDir, depth: usize) -> DatasetWriter {
        DatasetWriter::open(
            &dir.path().join("testdata"),
            &device(),
            depth,
            Arc::new(Mutex::new(CaptureStats::new())),
            None,
        )
        .unwrap()
    }

    #[test]
    fn open_creates_layout_and_camera_file() {
        let dir = TempDir::new().unwrap();
        let writer = open_in(&dir, 4);

        let root = writer.folder().to_path_buf();
        assert!(root.join("rgb").is_dir());
        assert!(root.join("depth").is_dir());

        let camera: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(root.join("camera.json")).unwrap())
                .unwrap();
        assert_eq!(camera["deviceType"], "D435");
    }

    #[test]
    fn open_clears_previous_contents() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("testdata");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("stale.txt"), "old").unwrap();

        let _writer = open_in(&dir, 4);
        assert!(!folder.join("stale.txt").exists());
    }

    #[test]
    fn open_fails_when_path_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let result = DatasetWriter::open(
            &blocker.join("testdata"),
            &device(),
            4,
            Arc::new(Mutex::new(CaptureStats::new())),
            None,
        );
        assert!(matches!(result, Err(CaptureError::StorageUnavailable(_))));
    }

    #[test]
    fn open_refuses_root_and_parent_paths() {
        let dir = TempDir::new().unwrap();
        let keep = dir.path().join("keep.txt");
        std::fs::write(&keep, "data").unwrap();

        std::fs::create_dir(dir.path().join("sub")).unwrap();

        for folder in [dir.path().join("sub").join(".."), PathBuf::from("/")] {
            let result = DatasetWriter::open(
                &folder,
                &device(),
                4,
                Arc::new(Mutex::new(CaptureStats::new())),
                None,
            );
            assert!(matches!(result, Err(CaptureError::StorageUnavailable(_))));
        }
        assert!(keep.exists());
        assert!(dir.path().join("sub").is_dir());
    }

    #[test]
    fn frames_are_written_in_order() {
        let dir = TempDir::new().unwrap();
        let mut writer = open_in(&dir, 4);
        for n in 0..3 {
            writer.append(frame(n)).unwrap();
        }
        let manifest = writer.close().unwrap();

        assert_eq!(manifest.frames_written, 3);
        assert_eq!(manifest.first_timestamp_us, Some(1000));
        assert_eq!(manifest.last_timestamp_us, Some(1002));

        let root = writer.folder();
        for name in ["000000.png", "000001.png", "000002.png"] {
            assert!(root.join("rgb").join(name).exists(), "missing rgb/{name}");
            assert!(root.join("depth").join(name).exists(), "missing depth/{name}");
        }
        assert!(root.join("manifest.json").exists());
    }

    #[test]
    fn depth_png_is_sixteen_bit_tenth_mm() {
        let dir = TempDir::new().unwrap();
        let mut writer = open_in(&dir, 4);
        writer.append(frame(0)).unwrap();
        writer.close().unwrap();

        let img = image::open(writer.folder().join("depth").join("000000.png")).unwrap();
        let gray = img.to_luma16();
        assert_eq!(gray.dimensions(), (4, 2));
        assert_eq!(gray.get_pixel(0, 0).0[0], 10_000);
    }

    #[test]
    fn small_queue_blocks_instead_of_dropping() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(Mutex::new(CaptureStats::new()));
        let mut writer = DatasetWriter::open(
            &dir.path().join("testdata"),
            &device(),
            1,
            Arc::clone(&stats),
            None,
        )
        .unwrap();

        for n in 0..20 {
            writer.append(frame(n)).unwrap();
        }
        let manifest = writer.close().unwrap();

        assert_eq!(writer.queued(), 20);
        assert_eq!(manifest.frames_written, 20);
        assert_eq!(stats.lock().frames_written(), 20);
    }

    #[test]
    fn close_is_idempotent_and_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let mut writer = open_in(&dir, 4);
        writer.append(frame(0)).unwrap();

        let first = writer.close().unwrap();
        let second = writer.close().unwrap();
        assert_eq!(first, second);
        assert!(!writer.is_open());

        let result = writer.append(frame(1));
        assert!(matches!(result, Err(CaptureError::StorageUnavailable(_))));
    }

    #[test]
    fn write_failure_is_reported_once() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let on_error: WriteErrorCallback = Arc::new(move |_msg| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        });

        let mut writer = DatasetWriter::open(
            &dir.path().join("testdata"),
            &device(),
            4,
            Arc::new(Mutex::new(CaptureStats::new())),
            Some(on_error),
        )
        .unwrap();
        std::fs::remove_dir_all(writer.folder().join("rgb")).unwrap();

        writer.append(frame(0)).unwrap();
        writer.append(frame(1)).unwrap();
        let manifest = writer.close().unwrap();

        assert_eq!(manifest.frames_written, 0);
        assert_eq!(manifest.write_failures, 2);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
