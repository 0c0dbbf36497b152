use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use nalgebra::Vector3;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::Frame;

pub const INPUT_SIZE: u32 = 224;
pub const NUM_LANDMARKS: usize = 21;

#[derive(Clone, Debug)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

/// Fits the frame into a square model input, keeping the aspect ratio and
/// padding the short side with black.
pub fn letterbox_input(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, Letterbox)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len || expected_len == 0 {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target_size);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("letterbox resize failed")?;
    let resized = dst_image.into_vec();

    let side = target_size as usize;
    let pad_x = (side - new_w as usize) / 2;
    let pad_y = (side - new_h as usize) / 2;
    let src_stride = new_w as usize * 4;

    let mut canvas = vec![0.0f32; side * side * 3];
    canvas
        .par_chunks_mut(side * 3)
        .enumerate()
        .skip(pad_y)
        .take(new_h as usize)
        .for_each(|(y, row)| {
            let src = &resized[(y - pad_y) * src_stride..(y - pad_y + 1) * src_stride];
            for (x, px) in src.chunks_exact(4).enumerate() {
                let dst = &mut row[(pad_x + x) * 3..(pad_x + x) * 3 + 3];
                dst[0] = px[0] as f32 / 255.0;
                dst[1] = px[1] as f32 / 255.0;
                dst[2] = px[2] as f32 / 255.0;
            }
        });

    let input = Array4::<f32>::from_shape_vec((1, side, side, 3), canvas)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    ))
}

/// Reads the first 21 xyz triples, mapped back to source pixel space.
pub fn decode_landmarks(flat: &[f32], letterbox: &Letterbox) -> Result<Vec<Vector3<f32>>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| {
            Vector3::new(
                (c[0] - letterbox.pad_x) / letterbox.scale,
                (c[1] - letterbox.pad_y) / letterbox.scale,
                c[2] / letterbox.scale,
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_frame_is_padded_vertically() {
        let frame = Frame::filled(640, 360, [255, 255, 255, 255]);
        let (input, letterbox) = letterbox_input(&frame, INPUT_SIZE).expect("letterbox");

        assert_eq!(input.shape(), &[1, 224, 224, 3]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert!(letterbox.pad_y > 0.0);
        assert_eq!(input[[0, 0, 112, 0]], 0.0);
        assert!((input[[0, 112, 112, 0]] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0, 255]);
        frame.rgba.truncate(10);
        assert!(letterbox_input(&frame, INPUT_SIZE).is_err());
    }

    #[test]
    fn landmarks_are_unprojected() {
        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 10.0,
        };
        let flat: Vec<f32> = (0..NUM_LANDMARKS)
            .flat_map(|_| [50.0, 60.0, 1.0])
            .collect();

        let landmarks = decode_landmarks(&flat, &letterbox).expect("decode");

        assert_eq!(landmarks.len(), NUM_LANDMARKS);
        assert_eq!(landmarks[0], Vector3::new(100.0, 100.0, 2.0));
        assert!(decode_landmarks(&flat[..10], &letterbox).is_err());
    }
}
