//! RGB <-> HSV conversion on 8-bit samples.
//!
//! All three HSV channels are stored as `u8` in `0..=255`. Hue wraps the
//! full circle onto `0..=255` (not degrees), matching the 8-bit HSV mode
//! common to imaging libraries. Hue and saturation are truncated toward
//! zero on the way in; the RGB components are rounded on the way out.
//! The round trip is therefore lossy by a few levels for saturated
//! colors, and exact for grays.

use bandscale_pipeline::{CHANNELS, ImageBuffer, PipelineError, Shape};
use image::{Rgb, RgbImage};

use crate::IoError;

/// Clamp to `0..=255` and truncate.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clip8(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Convert one RGB pixel to 8-bit HSV.
#[must_use]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == min {
        return [0, 0, max];
    }

    let maxf = f32::from(max);
    let range = maxf - f32::from(min);
    let saturation = range / maxf;
    let rc = (maxf - f32::from(r)) / range;
    let gc = (maxf - f32::from(g)) / range;
    let bc = (maxf - f32::from(b)) / range;

    let sector = if r == max {
        bc - gc
    } else if g == max {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    // sector / 6 lies in [-1/6, 5/6], so the shifted value is positive.
    let hue = (sector / 6.0 + 1.0) % 1.0;

    [clip8(hue * 255.0), clip8(saturation * 255.0), max]
}

/// Convert one 8-bit HSV pixel back to RGB.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn hsv_to_rgb([h, s, v]: [u8; 3]) -> [u8; 3] {
    if s == 0 {
        return [v, v, v];
    }

    let scaled = f32::from(h) * 6.0 / 255.0;
    let sector = scaled.floor();
    let frac = scaled - sector;
    let sat = f32::from(s) / 255.0;
    let value = f32::from(v);

    let p = clip8((value * (1.0 - sat)).round());
    let q = clip8((value * (1.0 - sat * frac)).round());
    let t = clip8((value * (1.0 - sat * (1.0 - frac))).round());

    // h = 255 lands exactly on sector 6, which is sector 0 again.
    match sector as u8 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Convert a decoded RGB image into a row-major HSV buffer.
///
/// # Errors
///
/// Returns [`IoError::Pipeline`] if the pixel data does not fill the
/// image's dimensions.
pub fn rgb_image_to_hsv(rgb: &RgbImage) -> Result<ImageBuffer<u8>, IoError> {
    let shape = Shape::new(rgb.height() as usize, rgb.width() as usize, CHANNELS);
    let data: Vec<u8> = rgb.pixels().flat_map(|px| rgb_to_hsv(px.0)).collect();
    Ok(ImageBuffer::from_vec(shape, data)?)
}

/// Convert an HSV buffer into an RGB image ready for encoding.
///
/// # Errors
///
/// Returns [`IoError::Pipeline`] if the buffer does not have three
/// channels, and [`IoError::Dimensions`] if it is too large for the
/// `image` crate.
pub fn hsv_to_rgb_image(hsv: &ImageBuffer<u8>) -> Result<RgbImage, IoError> {
    let shape = hsv.shape();
    if shape.channels != CHANNELS {
        return Err(PipelineError::ChannelCount {
            expected: CHANNELS,
            actual: shape.channels,
        }
        .into());
    }

    let too_large = || IoError::Dimensions {
        height: shape.height,
        width: shape.width,
    };
    let width = u32::try_from(shape.width).map_err(|_| too_large())?;
    let height = u32::try_from(shape.height).map_err(|_| too_large())?;

    let mut rgb = RgbImage::new(width, height);
    for (pixel, px) in rgb
        .pixels_mut()
        .zip(hsv.as_slice().chunks_exact(CHANNELS))
    {
        *pixel = Rgb(hsv_to_rgb([px[0], px[1], px[2]]));
    }
    Ok(rgb)
}
