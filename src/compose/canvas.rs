//! Off-screen RGBA drawing surface

use super::types::Rect;
use crate::media::Frame;

/// An owned RGBA8 buffer the composer renders into
pub struct Canvas {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl Canvas {
    /// Create an opaque black canvas
    pub fn new(width: u32, height: u32) -> Self {
        let mut canvas = Self {
            width,
            height,
            buffer: vec![0; (width as usize) * (height as usize) * 4],
        };
        canvas.clear();
        canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    /// Reset to opaque black
    pub fn clear(&mut self) {
        for px in self.buffer.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
    }

    /// Draw `frame` scaled into `dest` with nearest-neighbour sampling.
    /// Pixels falling outside the canvas are skipped.
    pub fn draw_scaled(&mut self, frame: &Frame, dest: Rect) {
        if dest.width == 0 || dest.height == 0 {
            return;
        }

        let src = frame.data();
        let (src_w, src_h) = (frame.width(), frame.height());

        for dy in 0..dest.height {
            let canvas_y = dest.y + dy;
            if canvas_y >= self.height {
                break;
            }
            let src_y = ((dy as u64 * src_h as u64) / dest.height as u64).min(src_h as u64 - 1) as u32;

            for dx in 0..dest.width {
                let canvas_x = dest.x + dx;
                if canvas_x >= self.width {
                    break;
                }
                let src_x =
                    ((dx as u64 * src_w as u64) / dest.width as u64).min(src_w as u64 - 1) as u32;

                let src_idx = ((src_y * src_w + src_x) * 4) as usize;
                let dest_idx = ((canvas_y * self.width + canvas_x) * 4) as usize;

                if src_idx + 3 >= src.len() || dest_idx + 3 >= self.buffer.len() {
                    continue;
                }

                self.buffer[dest_idx..dest_idx + 3].copy_from_slice(&src[src_idx..src_idx + 3]);
                self.buffer[dest_idx + 3] = 255;
            }
        }
    }

    /// Draw `frame` stretched over the full canvas
    pub fn fill(&mut self, frame: &Frame) {
        let bounds = self.bounds();
        self.draw_scaled(frame, bounds);
    }

    /// Copy the current contents into a frame
    pub fn snapshot(&self) -> Option<Frame> {
        Frame::from_rgba(self.width, self.height, self.buffer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_canvas_is_black() {
        let canvas = Canvas::new(4, 4);
        let frame = canvas.snapshot().unwrap();
        assert_eq!(frame.pixel(2, 2), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_fill_scales_up() {
        let mut canvas = Canvas::new(8, 8);
        canvas.fill(&Frame::solid(2, 2, [200, 0, 0, 255]));
        let frame = canvas.snapshot().unwrap();
        assert_eq!(frame.pixel(0, 0), Some([200, 0, 0, 255]));
        assert_eq!(frame.pixel(7, 7), Some([200, 0, 0, 255]));
    }

    #[test]
    fn test_draw_scaled_only_touches_dest() {
        let mut canvas = Canvas::new(10, 10);
        let dest = Rect {
            x: 6,
            y: 6,
            width: 3,
            height: 3,
        };
        canvas.draw_scaled(&Frame::solid(5, 5, [0, 255, 0, 255]), dest);
        let frame = canvas.snapshot().unwrap();
        assert_eq!(frame.pixel(7, 7), Some([0, 255, 0, 255]));
        assert_eq!(frame.pixel(5, 5), Some([0, 0, 0, 255]));
        assert_eq!(frame.pixel(9, 9), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_draw_clips_at_edges() {
        let mut canvas = Canvas::new(4, 4);
        let dest = Rect {
            x: 2,
            y: 2,
            width: 10,
            height: 10,
        };
        canvas.draw_scaled(&Frame::solid(1, 1, [1, 2, 3, 255]), dest);
        let frame = canvas.snapshot().unwrap();
        assert_eq!(frame.pixel(3, 3), Some([1, 2, 3, 255]));
    }
}
