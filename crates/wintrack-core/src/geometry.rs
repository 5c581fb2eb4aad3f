//! Pixel geometry shared by backends and placement.

/// An axis-aligned pixel rectangle. Origins may be negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Same size, new origin.
    pub const fn at(self, x: i32, y: i32) -> Self {
        Self { x, y, ..self }
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    /// Origin that centres `self` inside `container`.
    pub fn centered_in(&self, container: &Rect) -> Rect {
        self.at(
            container.x + (container.width - self.width) / 2,
            container.y + (container.height - self.height) / 2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let outer = Rect::new(0, 0, 100, 100);
        assert!(outer.contains(&Rect::new(10, 10, 50, 50)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&Rect::new(60, 60, 50, 50)));
        assert!(!outer.contains(&Rect::new(-1, 0, 10, 10)));
    }

    #[test]
    fn test_centered_in() {
        let container = Rect::new(100, 0, 1000, 800);
        let centered = Rect::new(0, 0, 200, 100).centered_in(&container);
        assert_eq!(centered, Rect::new(500, 350, 200, 100));
    }
}
