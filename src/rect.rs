/// Axis-aligned rectangle addressed by its center, the way the game tracks
/// birds and pipes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Rectangle hanging below the midpoint of its top edge.
    pub fn from_midtop(x: f32, top: f32, w: f32, h: f32) -> Self {
        Self::new(x, top + h / 2.0, w, h)
    }

    /// Rectangle rising above the midpoint of its bottom edge.
    pub fn from_midbottom(x: f32, bottom: f32, w: f32, h: f32) -> Self {
        Self::new(x, bottom - h / 2.0, w, h)
    }

    pub fn left(&self) -> f32 {
        self.cx - self.w / 2.0
    }

    pub fn right(&self) -> f32 {
        self.cx + self.w / 2.0
    }

    pub fn top(&self) -> f32 {
        self.cy - self.h / 2.0
    }

    pub fn bottom(&self) -> f32 {
        self.cy + self.h / 2.0
    }

    // Touching edges do not count as an overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && self.right() > other.left()
            && self.top() < other.bottom()
            && self.bottom() > other.top()
    }
}
