/// RGBA canvas with the few primitives the preview needs.
pub struct Canvas<'a> {
    buffer: &'a mut [u8],
    width: u32,
    height: u32,
}

impl<'a> Canvas<'a> {
    pub fn new(buffer: &'a mut [u8], width: u32, height: u32) -> Self {
        Self {
            buffer,
            width,
            height,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.buffer.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Bresenham line with a diamond-shaped brush.
    pub fn line(&mut self, p0: (f32, f32), p1: (f32, f32), color: [u8; 4], thickness: i32) {
        let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
        let (x1, y1) = (p1.0 as i32, p1.1 as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness.max(1) - 1) / 2;

        loop {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox.abs() + oy.abs() <= radius {
                        self.put_pixel(x0 + ox, y0 + oy, color);
                    }
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    pub fn circle(&mut self, center: (f32, f32), radius: i32, color: [u8; 4]) {
        self.ellipse(center, radius, radius, color);
    }

    /// Filled axis-aligned ellipse. A zero radius draws a flat line.
    pub fn ellipse(&mut self, center: (f32, f32), rx: i32, ry: i32, color: [u8; 4]) {
        let (cx, cy) = (center.0 as i32, center.1 as i32);
        let (rx, ry) = (rx.max(0), ry.max(0));
        let (rx2, ry2) = ((rx * rx).max(1) as i64, (ry * ry).max(1) as i64);
        for dy in -ry..=ry {
            for dx in -rx..=rx {
                let (dx2, dy2) = ((dx * dx) as i64, (dy * dy) as i64);
                if dx2 * ry2 + dy2 * rx2 <= rx2 * ry2 {
                    self.put_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = ((uy * self.width + ux) as usize) * 4;
        if idx + 3 < self.buffer.len() {
            self.buffer[idx..idx + 4].copy_from_slice(&color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(buffer: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) as usize) * 4;
        [buffer[idx], buffer[idx + 1], buffer[idx + 2], buffer[idx + 3]]
    }

    #[test]
    fn line_covers_both_endpoints() {
        let mut buffer = vec![0u8; 10 * 10 * 4];
        let mut canvas = Canvas::new(&mut buffer, 10, 10);
        canvas.line((1.0, 1.0), (8.0, 5.0), [255, 0, 0, 255], 1);

        assert_eq!(pixel(&buffer, 10, 1, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(&buffer, 10, 8, 5), [255, 0, 0, 255]);
        assert_eq!(pixel(&buffer, 10, 8, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn shapes_are_clipped_to_the_canvas() {
        let mut buffer = vec![0u8; 4 * 4 * 4];
        let mut canvas = Canvas::new(&mut buffer, 4, 4);
        canvas.circle((0.0, 0.0), 3, [1, 2, 3, 4]);
        canvas.line((-5.0, -5.0), (20.0, 20.0), [9, 9, 9, 9], 3);

        assert_eq!(pixel(&buffer, 4, 3, 0), [1, 2, 3, 4]);
        assert_eq!(pixel(&buffer, 4, 3, 3), [9, 9, 9, 9]);
    }

    #[test]
    fn flat_ellipse_draws_a_single_row() {
        let mut buffer = vec![0u8; 8 * 8 * 4];
        let mut canvas = Canvas::new(&mut buffer, 8, 8);
        canvas.ellipse((4.0, 4.0), 3, 0, [7, 7, 7, 255]);

        assert_eq!(pixel(&buffer, 8, 1, 4), [7, 7, 7, 255]);
        assert_eq!(pixel(&buffer, 8, 4, 3), [0, 0, 0, 0]);
    }
}
