use stream_bridge::{BridgeResult, Frame, Region};

const BOX_SIZE: u32 = 64;
// quality asked for around the moving box
const BOX_QUALITY: i32 = 10;

/// Generates BGR frames: a static gradient with a bright box sliding
/// across it. Each frame carries the box as a region hint.
pub struct TestPattern {
    width: u32,
    height: u32,
    background: Vec<u8>,
    index: u64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        let mut background = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                background.push((x * 255 / width.max(1)) as u8);
                background.push((y * 255 / height.max(1)) as u8);
                background.push(64);
            }
        }
        Self {
            width,
            height,
            background,
            index: 0,
        }
    }

    /// Box position for frame `index`, bouncing between the edges.
    fn box_region(&self, index: u64) -> Region {
        let size = BOX_SIZE.min(self.width).min(self.height);
        let span_x = (self.width - size) as u64;
        let span_y = (self.height - size) as u64;
        let bounce = |step: u64, span: u64| -> u32 {
            if span == 0 {
                return 0;
            }
            let p = step % (2 * span);
            (if p > span { 2 * span - p } else { p }) as u32
        };
        Region::new(bounce(index * 4, span_x), bounce(index * 2, span_y), size, size, BOX_QUALITY)
    }

    pub fn next_frame(&mut self, timestamp_ms: i64) -> BridgeResult<Frame> {
        let region = self.box_region(self.index);
        self.index += 1;

        let mut data = self.background.clone();
        let row_bytes = (self.width * 3) as usize;
        for y in region.y..region.y + region.height {
            let start = y as usize * row_bytes + region.x as usize * 3;
            for pixel in data[start..start + region.width as usize * 3].chunks_exact_mut(3) {
                pixel.copy_from_slice(&[255, 255, 255]);
            }
        }

        Ok(Frame::new(data, self.width, self.height, 3, timestamp_ms)?.with_regions([region]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_match_geometry_and_carry_box() {
        let mut pattern = TestPattern::new(320, 240);
        let frame = pattern.next_frame(0).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (320, 240, 3));
        assert_eq!(frame.regions().len(), 1);

        let region = frame.regions()[0];
        assert_eq!((region.x, region.y), (0, 0));
        let inside = (region.y as usize * 320 + region.x as usize) * 3;
        assert_eq!(&frame.data()[inside..inside + 3], &[255, 255, 255]);
    }

    #[test]
    fn test_box_moves_and_stays_inside() {
        let mut pattern = TestPattern::new(160, 96);
        let first = pattern.next_frame(0).unwrap().regions()[0];
        let second = pattern.next_frame(40).unwrap().regions()[0];
        assert_ne!((first.x, first.y), (second.x, second.y));

        for i in 0..500 {
            let r = pattern.next_frame(i).unwrap().regions()[0];
            assert!(r.x + r.width <= 160 && r.y + r.height <= 96);
        }
    }

    #[test]
    fn test_tiny_frames_shrink_the_box() {
        let mut pattern = TestPattern::new(16, 8);
        let r = pattern.next_frame(0).unwrap().regions()[0];
        assert_eq!((r.width, r.height), (8, 8));
        let r = pattern.next_frame(1).unwrap().regions()[0];
        assert_eq!(r.y, 0);
    }
}
