//!
//! Camera frames and the capture loop
//!

mod convert;
mod replay;
mod throttle;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use image::RgbImage;
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::sync::Notify;

pub use convert::encode_jpeg;
pub use replay::ReplaySource;
pub use throttle::FrameThrottle;

use crate::error::{Error, FailedToSpawnCaptureSnafu};

/// Pixel layout of a [`Frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
    Rgba8888,
    /// Planar YUV 4:2:0 (Y, U, V planes, chroma subsampled by 2 in both directions)
    Yuv420,
    /// A format the camera backend reported but we can't convert
    Other(i32),
}
impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("JPEG"),
            Self::Rgba8888 => f.write_str("RGBA_8888"),
            Self::Yuv420 => f.write_str("YUV_420_888"),
            Self::Other(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// One plane of pixel data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two rows
    pub row_stride: usize,
    /// Bytes between two horizontally adjacent samples
    pub pixel_stride: usize,
}
impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// A plane with no padding
    pub fn packed(data: Vec<u8>, width: u32, pixel_stride: usize) -> Self {
        Self::new(data, width as usize * pixel_stride, pixel_stride)
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A captured camera frame
///
/// Frames are move-only. Dropping one releases it: the release hook (if any) runs exactly once,
/// which lets a camera backend recycle its buffers.
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    timestamp: Duration,
    on_release: Option<ReleaseHook>,
}
impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
        timestamp: Duration,
    ) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            timestamp,
            on_release: None,
        }
    }

    /// An encoded JPEG frame
    pub fn jpeg(width: u32, height: u32, data: Vec<u8>, timestamp: Duration) -> Self {
        Self::new(
            width,
            height,
            PixelFormat::Jpeg,
            vec![Plane::new(data, 0, 0)],
            timestamp,
        )
    }

    /// An RGBA frame with the given row stride
    pub fn rgba(
        width: u32,
        height: u32,
        data: Vec<u8>,
        row_stride: usize,
        timestamp: Duration,
    ) -> Self {
        Self::new(
            width,
            height,
            PixelFormat::Rgba8888,
            vec![Plane::new(data, row_stride, 4)],
            timestamp,
        )
    }

    /// A planar YUV 4:2:0 frame
    pub fn yuv420(width: u32, height: u32, y: Plane, u: Plane, v: Plane, timestamp: Duration) -> Self {
        Self::new(width, height, PixelFormat::Yuv420, vec![y, u, v], timestamp)
    }

    /// Run `hook` when the frame is released
    pub fn with_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn format(&self) -> PixelFormat {
        self.format
    }
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }
    /// Capture time, relative to the start of the source
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Decode the frame into packed RGB
    pub fn to_rgb(&self) -> Result<RgbImage, Error> {
        convert::to_rgb(self)
    }

    /// Encode the frame as JPEG
    ///
    /// JPEG frames are passed through untouched.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, Error> {
        convert::to_jpeg(self, quality)
    }
}
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

/// Something that produces frames
///
/// `next_frame` blocks until a frame is available. `Ok(None)` means the source is exhausted.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;
}

/// Single-slot frame hand-off that only keeps the latest frame
///
/// Publishing replaces (and releases) whatever frame hasn't been taken yet.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Frame>>,
    notify: Notify,
    closed: AtomicBool,
}
impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, dropping the previous one
    pub fn publish(&self, frame: Frame) {
        let stale = self.slot.lock().replace(frame);
        self.notify.notify_one();
        drop(stale);
    }

    /// Take the current frame, if any
    pub fn take(&self) -> Option<Frame> {
        self.slot.lock().take()
    }

    /// Wait for the next frame
    ///
    /// Returns [`None`] once the producer has closed the slot and the last frame was taken.
    pub async fn next(&self) -> Option<Frame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.take() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The camera manager
///
/// Owns the capture thread. Frames coming out of the source go through the [`FrameThrottle`]
/// and land in a [`LatestFrame`] slot.
pub struct CamManager {
    frames: Arc<LatestFrame>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}
impl CamManager {
    /// Start capturing from `source` on a background thread
    pub fn spawn<S: FrameSource>(mut source: S, throttle: Arc<FrameThrottle>) -> Result<Self, Error> {
        let frames = Arc::new(LatestFrame::new());
        let stop = Arc::new(AtomicBool::new(false));

        let frames_ = frames.clone();
        let stop_ = stop.clone();
        let handle = std::thread::Builder::new()
            .name(String::from("capture"))
            .spawn(move || {
                debug!("capture thread started");

                while !stop_.load(Ordering::Acquire) {
                    match source.next_frame() {
                        Ok(Some(frame)) => {
                            if let Some(frame) = throttle.offer(frame) {
                                frames_.publish(frame);
                            }
                        }
                        Ok(None) => {
                            info!("frame source exhausted");
                            break;
                        }
                        Err(err) => {
                            error!("failed to capture frame: {err}");
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }

                frames_.close();
                debug!("capture thread stopped");
            })
            .context(FailedToSpawnCaptureSnafu)?;

        Ok(Self {
            frames,
            stop,
            handle: Some(handle),
        })
    }

    /// The slot throttled frames are published to
    pub fn frames(&self) -> Arc<LatestFrame> {
        self.frames.clone()
    }

    /// Stop capturing and wait for the capture thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}
impl Drop for CamManager {
    fn drop(&mut self) {
        self.stop();
    }
}
