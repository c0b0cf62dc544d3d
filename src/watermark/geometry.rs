/// A pixel rectangle in image coordinates. The origin may lie outside the
/// image; use [`Region::clamp_to`] before indexing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Grow by `amount` pixels on every side.
    pub fn expand(&self, amount: u32) -> Self {
        Self {
            x: self.x - amount as i64,
            y: self.y - amount as i64,
            width: self.width + 2 * amount,
            height: self.height + 2 * amount,
        }
    }

    /// Intersection with a `width` x `height` image, or `None` when nothing of
    /// the region lies inside it.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let left = self.x.max(0);
        let top = self.y.max(0);
        let right = self.right().min(width as i64);
        let bottom = self.bottom().min(height as i64);

        if right <= left || bottom <= top {
            return None;
        }

        Some(Self {
            x: left,
            y: top,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}
