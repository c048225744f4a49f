//!
//! Pixel format conversion
//!

use image::{codecs::jpeg::JpegEncoder, ExtendedColorType, ImageFormat, RgbImage};
use snafu::ResultExt;

use super::{Frame, PixelFormat, Plane};
use crate::error::{Error, FailedToDecodeSnafu, FailedToEncodeSnafu};

/// Convert any supported frame into packed RGB
pub fn to_rgb(frame: &Frame) -> Result<RgbImage, Error> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }

    match frame.format() {
        PixelFormat::Jpeg => {
            let plane = plane(frame, 0)?;
            let img = image::load_from_memory_with_format(&plane.data, ImageFormat::Jpeg)
                .context(FailedToDecodeSnafu)?;
            Ok(img.to_rgb8())
        }
        PixelFormat::Rgba8888 => rgba_to_rgb(plane(frame, 0)?, width, height),
        PixelFormat::Yuv420 => {
            let nv21 = yuv420_to_nv21(frame)?;
            nv21_to_rgb(&nv21, width, height)
        }
        PixelFormat::Other(_) => Err(Error::UnsupportedFormat {
            format: frame.format().to_string(),
        }),
    }
}

/// Encode a frame as JPEG
pub fn to_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, Error> {
    match frame.format() {
        PixelFormat::Jpeg => Ok(plane(frame, 0)?.data.clone()),
        _ => encode_jpeg(&to_rgb(frame)?, quality),
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .context(FailedToEncodeSnafu)?;
    Ok(buf)
}

fn plane(frame: &Frame, idx: usize) -> Result<&Plane, Error> {
    frame.planes().get(idx).ok_or(Error::BufferTooSmall {
        plane: idx,
        expected: 1,
        actual: 0,
    })
}

/// Make sure samples don't overlap and the last one is in bounds
fn check_plane(
    plane: &Plane,
    idx: usize,
    cols: usize,
    rows: usize,
    bytes_per_sample: usize,
) -> Result<(), Error> {
    if plane.pixel_stride < bytes_per_sample {
        return Err(Error::InvalidPixelStride {
            plane: idx,
            pixel_stride: plane.pixel_stride,
        });
    }

    let expected = (rows - 1) * plane.row_stride + (cols - 1) * plane.pixel_stride + bytes_per_sample;
    if plane.data.len() < expected {
        return Err(Error::BufferTooSmall {
            plane: idx,
            expected,
            actual: plane.data.len(),
        });
    }
    Ok(())
}

fn rgba_to_rgb(plane: &Plane, width: u32, height: u32) -> Result<RgbImage, Error> {
    let (w, h) = (width as usize, height as usize);
    if plane.pixel_stride != 4 {
        return Err(Error::InvalidPixelStride {
            plane: 0,
            pixel_stride: plane.pixel_stride,
        });
    }
    if plane.row_stride < w * 4 {
        return Err(Error::BufferTooSmall {
            plane: 0,
            expected: w * 4,
            actual: plane.row_stride,
        });
    }
    check_plane(plane, 0, w, h, 4)?;

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in plane.data.chunks(plane.row_stride.max(1)).take(h) {
        for px in row[..w * 4].chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(Error::InvalidDimensions { width, height })
}

/// Pack the three planes of a YUV 4:2:0 frame into NV21 (Y plane, then interleaved V/U)
pub(super) fn yuv420_to_nv21(frame: &Frame) -> Result<Vec<u8>, Error> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    let y = plane(frame, 0)?;
    let u = plane(frame, 1)?;
    let v = plane(frame, 2)?;
    check_plane(y, 0, w, h, 1)?;
    check_plane(u, 1, cw, ch, 1)?;
    check_plane(v, 2, cw, ch, 1)?;

    let mut nv21 = Vec::with_capacity(w * h + cw * ch * 2);

    if y.pixel_stride == 1 && y.row_stride == w {
        nv21.extend_from_slice(&y.data[..w * h]);
    } else if y.pixel_stride == 1 {
        for row in 0..h {
            let start = row * y.row_stride;
            nv21.extend_from_slice(&y.data[start..start + w]);
        }
    } else {
        for row in 0..h {
            let start = row * y.row_stride;
            nv21.extend((0..w).map(|col| y.data[start + col * y.pixel_stride]));
        }
    }

    for row in 0..ch {
        let (v_row, u_row) = (row * v.row_stride, row * u.row_stride);

        if v.pixel_stride == 1 && u.pixel_stride == 1 {
            let vs = &v.data[v_row..v_row + cw];
            let us = &u.data[u_row..u_row + cw];
            for (&vv, &uu) in vs.iter().zip(us) {
                nv21.push(vv);
                nv21.push(uu);
            }
        } else {
            for col in 0..cw {
                nv21.push(v.data[v_row + col * v.pixel_stride]);
                nv21.push(u.data[u_row + col * u.pixel_stride]);
            }
        }
    }

    Ok(nv21)
}

/// Convert NV21 to RGB using BT.601 limited range coefficients
///
/// - R = 1.164 (Y - 16) + 1.596 (V - 128)
/// - G = 1.164 (Y - 16) - 0.392 (U - 128) - 0.813 (V - 128)
/// - B = 1.164 (Y - 16) + 2.017 (U - 128)
pub(super) fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> Result<RgbImage, Error> {
    let (w, h) = (width as usize, height as usize);
    let cw = w.div_ceil(2);
    let expected = w * h + cw * h.div_ceil(2) * 2;
    if nv21.len() < expected {
        return Err(Error::BufferTooSmall {
            plane: 0,
            expected,
            actual: nv21.len(),
        });
    }

    let (luma, chroma) = nv21.split_at(w * h);
    let mut rgb = Vec::with_capacity(w * h * 3);

    for row in 0..h {
        for col in 0..w {
            let c = luma[row * w + col] as f32 - 16.0;
            let vu = ((row / 2) * cw + col / 2) * 2;
            let e = chroma[vu] as f32 - 128.0;
            let d = chroma[vu + 1] as f32 - 128.0;

            let r = 1.164 * c + 1.596 * e;
            let g = 1.164 * c - 0.392 * d - 0.813 * e;
            let b = 1.164 * c + 2.017 * d;

            rgb.extend_from_slice(&[
                r.round().clamp(0.0, 255.0) as u8,
                g.round().clamp(0.0, 255.0) as u8,
                b.round().clamp(0.0, 255.0) as u8,
            ]);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(Error::InvalidDimensions { width, height })
}
