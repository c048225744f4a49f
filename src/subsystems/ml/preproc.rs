//!
//! Frame preprocessing
//!
//! Frames are normalized to RGB, center-cropped to a square, rotated 90° clockwise (sensor
//! orientation) and resized to the model's input size.
//!

use fast_image_resize as fr;
use image::{imageops, RgbImage};

use crate::{cameras::Frame, error::Error};

/// Model input tensor
///
/// `size * size * 3` values in `[0, 1]`, row-major, RGB interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub size: u32,
    pub data: Vec<f32>,
}

pub struct Preprocessor {
    input_size: u32,
    resizer: fr::Resizer,
}
impl Preprocessor {
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            resizer: fr::Resizer::new(),
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Normalize, crop, rotate and resize a frame
    pub fn prepare(&mut self, frame: &Frame) -> Result<RgbImage, Error> {
        let rgb = frame.to_rgb()?;
        let square = center_crop(&rgb);
        let rotated = imageops::rotate90(&square);
        self.resize(&rotated)
    }

    /// Turn a frame into a model input tensor
    pub fn preprocess(&mut self, frame: &Frame) -> Result<Tensor, Error> {
        let img = self.prepare(frame)?;
        Ok(to_tensor(&img))
    }

    fn resize(&mut self, img: &RgbImage) -> Result<RgbImage, Error> {
        let size = self.input_size;
        if img.dimensions() == (size, size) {
            return Ok(img.clone());
        }

        let src = fr::images::ImageRef::new(img.width(), img.height(), img.as_raw(), fr::PixelType::U8x3)
            .map_err(|err| Error::FailedToResize {
                reason: err.to_string(),
            })?;
        let mut dst = fr::images::Image::new(size, size, fr::PixelType::U8x3);

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|err| Error::FailedToResize {
                reason: err.to_string(),
            })?;

        RgbImage::from_raw(size, size, dst.buffer().to_vec()).ok_or(Error::InvalidDimensions {
            width: size,
            height: size,
        })
    }
}

/// Crop the largest centered square out of an image
pub fn center_crop(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;

    imageops::crop_imm(img, x, y, side, side).to_image()
}

/// Scale every channel into `[0, 1]`
pub fn to_tensor(img: &RgbImage) -> Tensor {
    Tensor {
        size: img.width(),
        data: img.as_raw().iter().map(|&b| b as f32 / 255.0).collect(),
    }
}
