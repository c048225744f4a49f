use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use image::ImageReader;
use snafu::ResultExt;

use super::{Frame, FrameSource};
use crate::error::{Error, FailedToDecodeSnafu, FailedToReadFrameSnafu};

/// Replays still images from a directory as if they came from a camera
///
/// JPEG files are handed out as-is, anything else `image` can read is decoded to RGBA.
/// Files are played in name order at a fixed rate.
pub struct ReplaySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    idx: usize,
    period: Duration,
    looping: bool,
    start: Instant,
    last: Option<Instant>,
}
impl ReplaySource {
    /// Open a directory of images, played back at `fps`
    pub fn open(dir: impl AsRef<Path>, fps: u32) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .context(FailedToReadFrameSnafu { path: &dir })?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png")
                    })
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::NoFrames { path: dir });
        }

        debug!("replaying {} frames from {dir:?}", files.len());

        Ok(Self {
            dir,
            files,
            idx: 0,
            period: Duration::from_secs(1) / fps.max(1),
            looping: true,
            start: Instant::now(),
            last: None,
        })
    }

    /// Stop after the last file instead of starting over
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self, path: &Path) -> Result<Frame, Error> {
        let data = std::fs::read(path).context(FailedToReadFrameSnafu { path })?;
        let timestamp = self.start.elapsed();

        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg"));

        if is_jpeg {
            let (width, height) = ImageReader::new(Cursor::new(&data))
                .with_guessed_format()
                .context(FailedToReadFrameSnafu { path })?
                .into_dimensions()
                .context(FailedToDecodeSnafu)?;
            Ok(Frame::jpeg(width, height, data, timestamp))
        } else {
            let img = image::load_from_memory(&data)
                .context(FailedToDecodeSnafu)?
                .into_rgba8();
            let (width, height) = img.dimensions();
            Ok(Frame::rgba(
                width,
                height,
                img.into_raw(),
                width as usize * 4,
                timestamp,
            ))
        }
    }
}
impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if self.idx >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.idx = 0;
        }

        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            }
        }
        self.last = Some(Instant::now());

        let path = self.files[self.idx].clone();
        self.idx += 1;

        self.read(&path).map(Some)
    }
}
