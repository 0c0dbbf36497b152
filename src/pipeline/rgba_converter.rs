use std::{convert::TryFrom, time::Instant};

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Raw pixel layouts delivered by capture backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

/// Converts one captured buffer into an RGBA frame stamped now.
pub fn to_frame(format: PixelFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let (rgba, width, height) = match format {
        PixelFormat::Nv12 => (nv12_to_rgba(data, width, height)?, width, height),
        PixelFormat::Yuyv => (yuyv_to_rgba(data, width, height)?, width, height),
        PixelFormat::Mjpeg => mjpeg_to_rgba(data)?,
        PixelFormat::Rgb => (packed_to_rgba(data, width, height, false)?, width, height),
        PixelFormat::Bgr => (packed_to_rgba(data, width, height, true)?, width, height),
        PixelFormat::Gray => (gray_to_rgba(data, width, height)?, width, height),
    };

    Ok(Frame {
        rgba,
        width,
        height,
        timestamp: Instant::now(),
    })
}

fn ensure_len(kind: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected || expected == 0 {
        return Err(anyhow!(
            "{kind} buffer too small: got {}, expected {}",
            data.len(),
            expected
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let mut rgba = vec![0u8; y_plane_len * 4];
    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    ensure_len("YUYV", data, width as usize * height as usize * 2)?;

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

/// MJPEG frames carry their own size, which wins over the reported one.
fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    let expected = width as usize * height as usize * 4;
    if rgba.len() < expected {
        return Err(anyhow!(
            "MJPEG decode produced too few bytes: got {}, expected {}",
            rgba.len(),
            expected
        ));
    }

    Ok((rgba, width, height))
}

fn packed_to_rgba(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    ensure_len("RGB", data, width as usize * height as usize * 3)?;

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            let (r, b) = if swap_rb { (src[2], src[0]) } else { (src[0], src[2]) };
            dst.copy_from_slice(&[r, src[1], b, 255]);
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("GRAY", data, pixels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| dst.copy_from_slice(&[value, value, value, 255]));

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_channels_are_swapped() {
        let frame = to_frame(PixelFormat::Bgr, &[1, 2, 3, 4, 5, 6], 2, 1).expect("frame");
        assert_eq!(frame.rgba, vec![3, 2, 1, 255, 6, 5, 4, 255]);

        let frame = to_frame(PixelFormat::Rgb, &[1, 2, 3], 1, 1).expect("frame");
        assert_eq!(frame.rgba, vec![1, 2, 3, 255]);
    }

    #[test]
    fn gray_is_expanded_to_opaque_rgba() {
        let frame = to_frame(PixelFormat::Gray, &[0, 128], 2, 1).expect("frame");
        assert_eq!(frame.pixel(1, 0), Some([128, 128, 128, 255]));
    }

    #[test]
    fn neutral_yuyv_decodes_to_gray() {
        let data = [128u8; 4 * 2 * 2];
        let frame = to_frame(PixelFormat::Yuyv, &data, 4, 2).expect("frame");
        let px = frame.pixel(0, 0).expect("pixel");
        assert!(px[0].abs_diff(128) <= 2 && px[1].abs_diff(128) <= 2 && px[2].abs_diff(128) <= 2);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(to_frame(PixelFormat::Rgb, &[1, 2], 1, 1).is_err());
        assert!(to_frame(PixelFormat::Nv12, &[0; 5], 2, 2).is_err());
        assert!(to_frame(PixelFormat::Gray, &[], 0, 0).is_err());
        assert!(to_frame(PixelFormat::Mjpeg, b"not a jpeg", 2, 2).is_err());
    }
}
