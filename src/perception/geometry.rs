use serde::{Deserialize, Serialize};

/// A screen coordinate in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

/// Closed polygon given by its vertices in order. The closing edge from the
/// last vertex back to the first is implicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon(pub Vec<Point>);

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    pub fn rect(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self(vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.0.first()?;
        let mut b = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in &self.0[1..] {
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        Some(b)
    }

    fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.0.len();
        (0..n).map(move |i| (self.0[i], self.0[(i + 1) % n]))
    }

    /// Inside-or-on-boundary test (even-odd rule, edges count as inside).
    pub fn contains(&self, p: Point) -> bool {
        if self.0.len() < 3 {
            return self.edges().any(|(a, b)| on_segment(p, a, b));
        }
        let (px, py) = (p.x as f64, p.y as f64);
        let mut inside = false;
        for (a, b) in self.edges() {
            if on_segment(p, a, b) {
                return true;
            }
            let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
            if (ay > py) != (by > py) {
                let x_cross = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Signed shoelace area; positive for clockwise order in screen space.
    fn signed_area(&self) -> f64 {
        self.edges()
            .map(|(a, b)| a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64)
            .sum::<f64>()
            / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Area-moment centroid, falling back to the vertex mean for degenerate
    /// polygons.
    pub fn centroid(&self) -> Option<Point> {
        if self.0.is_empty() {
            return None;
        }
        let a = self.signed_area();
        if a.abs() < f64::EPSILON {
            let n = self.0.len() as f64;
            let sx: f64 = self.0.iter().map(|p| p.x as f64).sum();
            let sy: f64 = self.0.iter().map(|p| p.y as f64).sum();
            return Some(Point::new((sx / n).round() as i32, (sy / n).round() as i32));
        }
        let (mut cx, mut cy) = (0.0, 0.0);
        for (p, q) in self.edges() {
            let cross = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
            cx += (p.x + q.x) as f64 * cross;
            cy += (p.y + q.y) as f64 * cross;
        }
        Some(Point::new(
            (cx / (6.0 * a)).round() as i32,
            (cy / (6.0 * a)).round() as i32,
        ))
    }
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) as i64 * (p.y - a.y) as i64 - (b.y - a.y) as i64 * (p.x - a.x) as i64;
    cross == 0
        && p.x >= a.x.min(b.x)
        && p.x <= a.x.max(b.x)
        && p.y >= a.y.min(b.y)
        && p.y <= a.y.max(b.y)
}
