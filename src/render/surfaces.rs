use std::collections::BTreeMap;

use super::draw::Canvas;
use crate::types::Frame;

/// Preview surfaces the pipeline keeps around between sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SurfaceKind {
    /// Mirrored preview of the reference camera.
    ReferencePreview,
    /// Landmark overlay drawn on top of the preview.
    LandmarkOverlay,
}

#[derive(Debug)]
struct Surface {
    width: u32,
    height: u32,
    visible: bool,
    rgba: Vec<u8>,
}

/// Pool of reusable surfaces. Surfaces are allocated on first use, hidden
/// rather than freed on release and only dropped by `destroy`.
#[derive(Debug, Default)]
pub struct SurfacePool {
    surfaces: BTreeMap<SurfaceKind, Surface>,
    allocations: usize,
}

impl SurfacePool {
    /// Shows the surface, allocating it at `width`×`height` if needed.
    pub fn acquire(&mut self, kind: SurfaceKind, width: u32, height: u32) {
        let allocations = &mut self.allocations;
        let surface = self.surfaces.entry(kind).or_insert_with(|| {
            *allocations += 1;
            log::debug!("allocating {kind:?} surface {width}x{height}");
            Surface {
                width,
                height,
                visible: false,
                rgba: vec![0u8; width as usize * height as usize * 4],
            }
        });
        if surface.width != width || surface.height != height {
            surface.width = width;
            surface.height = height;
            surface
                .rgba
                .resize(width as usize * height as usize * 4, 0);
        }
        surface.visible = true;
    }

    pub fn release(&mut self, kind: SurfaceKind) {
        if let Some(surface) = self.surfaces.get_mut(&kind) {
            surface.visible = false;
        }
    }

    pub fn hide_all(&mut self) {
        for surface in self.surfaces.values_mut() {
            surface.visible = false;
        }
    }

    pub fn destroy(&mut self) {
        if !self.surfaces.is_empty() {
            log::debug!("destroying {} preview surfaces", self.surfaces.len());
        }
        self.surfaces.clear();
    }

    /// Draws `frame` mirrored into a visible surface, following the frame's
    /// size. Hidden or unallocated surfaces ignore the frame.
    pub fn present_mirrored(&mut self, kind: SurfaceKind, frame: &Frame) -> bool {
        let Some(surface) = self.surfaces.get_mut(&kind).filter(|s| s.visible) else {
            return false;
        };
        let expected = frame.width as usize * frame.height as usize * 4;
        if expected == 0 || frame.rgba.len() != expected {
            return false;
        }

        surface.width = frame.width;
        surface.height = frame.height;
        surface.rgba.resize(expected, 0);
        let stride = frame.width as usize * 4;
        for (dst_row, src_row) in surface
            .rgba
            .chunks_exact_mut(stride)
            .zip(frame.rgba.chunks_exact(stride))
        {
            for (dst, src) in dst_row
                .chunks_exact_mut(4)
                .zip(src_row.chunks_exact(4).rev())
            {
                dst.copy_from_slice(src);
            }
        }
        true
    }

    /// Runs `paint` on a visible surface. Hidden or unallocated surfaces are
    /// left alone.
    pub fn paint(&mut self, kind: SurfaceKind, paint: impl FnOnce(&mut Canvas<'_>)) -> bool {
        let Some(surface) = self.surfaces.get_mut(&kind).filter(|s| s.visible) else {
            return false;
        };
        let mut canvas = Canvas::new(&mut surface.rgba, surface.width, surface.height);
        paint(&mut canvas);
        true
    }

    pub fn pixel(&self, kind: SurfaceKind, x: u32, y: u32) -> Option<[u8; 4]> {
        let surface = self.surfaces.get(&kind)?;
        if x >= surface.width || y >= surface.height {
            return None;
        }
        let idx = (y as usize * surface.width as usize + x as usize) * 4;
        surface
            .rgba
            .get(idx..idx + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }

    pub fn is_allocated(&self, kind: SurfaceKind) -> bool {
        self.surfaces.contains_key(&kind)
    }

    pub fn is_visible(&self, kind: SurfaceKind) -> bool {
        self.surfaces.get(&kind).is_some_and(|s| s.visible)
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }
}
