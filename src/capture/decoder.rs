//! Device frame → RGBA raster conversion

use crate::error::{Result, WebcamError};

use super::frame::{Frame, PixelFormat, Raster};

/// Decode `frame` into `raster`, reshaping the raster to the frame geometry.
pub fn decode_frame(frame: &Frame, raster: &mut Raster) -> Result<()> {
    let meta = &frame.meta;
    match meta.format {
        PixelFormat::Mjpeg => decode_mjpeg(&frame.data, raster)?,
        PixelFormat::Rgb24 => {
            raster.resize(meta.width, meta.height);
            rgb24_to_rgba(&frame.data, meta.width, meta.height, meta.stride, raster.data_mut())?
        }
        PixelFormat::Rgba32 => {
            raster.resize(meta.width, meta.height);
            copy_rows(&frame.data, meta.width, meta.height, meta.stride, 4, raster.data_mut())?
        }
        PixelFormat::Yuyv4 => {
            raster.resize(meta.width, meta.height);
            yuyv_to_rgba(&frame.data, meta.width, meta.height, meta.stride, raster.data_mut())?
        }
    }
    raster.set_captured_at(frame.captured_at);
    Ok(())
}

#[cfg(feature = "v4l2-backend")]
fn decode_mjpeg(data: &[u8], raster: &mut Raster) -> Result<()> {
    use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| WebcamError::Decode(format!("MJPEG: {}", e)))?;
    let info = decoder
        .info()
        .ok_or_else(|| WebcamError::Decode("MJPEG: missing header".into()))?;

    let (width, height) = (info.width as u32, info.height as u32);
    raster.resize(width, height);
    match info.pixel_format {
        JpegPixelFormat::RGB24 => rgb24_to_rgba(&pixels, width, height, width * 3, raster.data_mut()),
        JpegPixelFormat::L8 => {
            for (dst, &luma) in raster.data_mut().chunks_exact_mut(4).zip(pixels.iter()) {
                dst.copy_from_slice(&[luma, luma, luma, 255]);
            }
            Ok(())
        }
        other => Err(WebcamError::Decode(format!("MJPEG: unsupported pixel format {:?}", other))),
    }
}

#[cfg(not(feature = "v4l2-backend"))]
fn decode_mjpeg(_data: &[u8], _raster: &mut Raster) -> Result<()> {
    Err(WebcamError::Decode("MJPEG support requires the v4l2-backend feature".into()))
}

fn check_len(data: &[u8], stride: u32, height: u32, row_bytes: u32) -> Result<()> {
    if stride < row_bytes {
        return Err(WebcamError::Decode(format!("stride {} shorter than row {}", stride, row_bytes)));
    }
    let needed = stride as usize * height.saturating_sub(1) as usize + row_bytes as usize;
    if height > 0 && data.len() < needed {
        return Err(WebcamError::Decode(format!("frame has {} bytes, need {}", data.len(), needed)));
    }
    Ok(())
}

fn copy_rows(src: &[u8], width: u32, height: u32, stride: u32, bpp: u32, dst: &mut [u8]) -> Result<()> {
    let row_bytes = width * bpp;
    if row_bytes == 0 {
        return Ok(());
    }
    check_len(src, stride, height, row_bytes)?;
    for (row, out) in dst.chunks_exact_mut(row_bytes as usize).enumerate().take(height as usize) {
        let start = row * stride as usize;
        out.copy_from_slice(&src[start..start + row_bytes as usize]);
    }
    Ok(())
}

fn rgb24_to_rgba(src: &[u8], width: u32, height: u32, stride: u32, dst: &mut [u8]) -> Result<()> {
    check_len(src, stride, height, width * 3)?;
    let out_row = width as usize * 4;
    for row in 0..height as usize {
        let line = &src[row * stride as usize..][..width as usize * 3];
        let out = &mut dst[row * out_row..][..out_row];
        for (px, rgba) in line.chunks_exact(3).zip(out.chunks_exact_mut(4)) {
            rgba.copy_from_slice(&[px[0], px[1], px[2], 255]);
        }
    }
    Ok(())
}

/// Packed 4:2:2 (Y0 U Y1 V) to RGBA using BT.601 integer coefficients.
fn yuyv_to_rgba(src: &[u8], width: u32, height: u32, stride: u32, dst: &mut [u8]) -> Result<()> {
    check_len(src, stride, height, width * 2)?;
    let out_row = width as usize * 4;
    for row in 0..height as usize {
        let line = &src[row * stride as usize..][..width as usize * 2];
        let out = &mut dst[row * out_row..][..out_row];
        for (macro_px, rgba) in line.chunks_exact(4).zip(out.chunks_exact_mut(8)) {
            let (y0, u, y1, v) = (macro_px[0], macro_px[1], macro_px[2], macro_px[3]);
            rgba[..4].copy_from_slice(&yuv_to_rgba(y0, u, v));
            rgba[4..].copy_from_slice(&yuv_to_rgba(y1, u, v));
        }
    }
    Ok(())
}

fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
        255,
    ]
}
