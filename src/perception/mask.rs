//! Binary pixel masks: morphology, connected components, polygon fill and
//! outer-contour tracing.

use crate::perception::geometry::{Point, Polygon};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; (width as usize) * (height as usize)],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn idx(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.data[self.idx(x, y)]
    }

    fn get_i(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && self.get(x as u32, y as u32)
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            let i = self.idx(x, y);
            self.data[i] = value;
        }
    }

    pub fn count(&self) -> u64 {
        self.data.iter().filter(|v| **v).count() as u64
    }

    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|v| *v)
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32) {
        let x_end = (x.saturating_add(w)).min(self.width);
        let y_end = (y.saturating_add(h)).min(self.height);
        for yy in y.min(self.height)..y_end {
            for xx in x.min(self.width)..x_end {
                let i = self.idx(xx, yy);
                self.data[i] = true;
            }
        }
    }

    pub fn intersect(&self, other: &Mask) -> Mask {
        self.zip(other, |a, b| a && b)
    }

    fn zip(&self, other: &Mask, op: impl Fn(bool, bool) -> bool) -> Mask {
        Mask::from_fn(self.width, self.height, |x, y| op(self.get(x, y), other.get(x, y)))
    }

    /// Rasterizes a polygon by pixel centers (even-odd rule).
    pub fn from_polygon(width: u32, height: u32, polygon: &Polygon) -> Mask {
        let mut mask = Mask::new(width, height);
        let pts = polygon.points();
        if pts.len() < 3 {
            return mask;
        }
        let mut crossings: Vec<f64> = Vec::new();
        for y in 0..height {
            let sy = y as f64 + 0.5;
            crossings.clear();
            for i in 0..pts.len() {
                let a = pts[i];
                let b = pts[(i + 1) % pts.len()];
                let (ay, by) = (a.y as f64, b.y as f64);
                if (ay > sy) != (by > sy) {
                    crossings.push(a.x as f64 + (sy - ay) * (b.x - a.x) as f64 / (by - ay));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for pair in crossings.chunks_exact(2) {
                let start = (pair[0] - 0.5).ceil().max(0.0) as u32;
                let end = (pair[1] - 0.5).floor();
                if end < 0.0 {
                    continue;
                }
                let end = (end as u32).min(width.saturating_sub(1));
                for x in start..=end {
                    if x < width {
                        mask.set(x, y, true);
                    }
                }
            }
        }
        mask
    }

    pub fn dilate(&self, kernel: u32) -> Mask {
        self.separable(kernel, |hits, _| hits > 0)
    }

    /// Pixels outside the image never erode their neighbours.
    pub fn erode(&self, kernel: u32) -> Mask {
        self.separable(kernel, |hits, span| hits == span)
    }

    /// Closing fills small holes, opening removes specks.
    pub fn close(&self, kernel: u32) -> Mask {
        self.dilate(kernel).erode(kernel)
    }

    pub fn open(&self, kernel: u32) -> Mask {
        self.erode(kernel).dilate(kernel)
    }

    fn separable(&self, kernel: u32, keep: impl Fn(u32, u32) -> bool) -> Mask {
        let r = (kernel / 2) as i64;
        if r == 0 {
            return self.clone();
        }
        let (w, h) = (self.width as i64, self.height as i64);

        let mut horizontal = Mask::new(self.width, self.height);
        let mut prefix = vec![0u32; self.width as usize + 1];
        for y in 0..self.height {
            for x in 0..self.width {
                prefix[x as usize + 1] = prefix[x as usize] + self.get(x, y) as u32;
            }
            for x in 0..w {
                let lo = (x - r).max(0) as usize;
                let hi = (x + r).min(w - 1) as usize;
                let hits = prefix[hi + 1] - prefix[lo];
                if keep(hits, (hi - lo + 1) as u32) {
                    horizontal.set(x as u32, y, true);
                }
            }
        }

        let mut out = Mask::new(self.width, self.height);
        let mut prefix = vec![0u32; self.height as usize + 1];
        for x in 0..self.width {
            for y in 0..self.height {
                prefix[y as usize + 1] = prefix[y as usize] + horizontal.get(x, y) as u32;
            }
            for y in 0..h {
                let lo = (y - r).max(0) as usize;
                let hi = (y + r).min(h - 1) as usize;
                let hits = prefix[hi + 1] - prefix[lo];
                if keep(hits, (hi - lo + 1) as u32) {
                    out.set(x, y as u32, true);
                }
            }
        }
        out
    }

    /// 4-connected labelling. Label 0 is background; component `i` has
    /// label `i + 1` and area `areas[i]`.
    pub fn label(&self) -> Labeling {
        let mut labels = vec![0u32; self.data.len()];
        let mut areas = Vec::new();
        let mut stack = Vec::new();
        for start in 0..self.data.len() {
            if !self.data[start] || labels[start] != 0 {
                continue;
            }
            areas.push(0u32);
            let label = areas.len() as u32;
            labels[start] = label;
            stack.push(start);
            while let Some(i) = stack.pop() {
                areas[label as usize - 1] += 1;
                let x = (i % self.width as usize) as u32;
                let y = (i / self.width as usize) as u32;
                let mut visit = |nx: u32, ny: u32| {
                    let j = self.idx(nx, ny);
                    if self.data[j] && labels[j] == 0 {
                        labels[j] = label;
                        stack.push(j);
                    }
                };
                if x > 0 {
                    visit(x - 1, y);
                }
                if x + 1 < self.width {
                    visit(x + 1, y);
                }
                if y > 0 {
                    visit(x, y - 1);
                }
                if y + 1 < self.height {
                    visit(x, y + 1);
                }
            }
        }
        Labeling {
            width: self.width,
            height: self.height,
            labels,
            areas,
        }
    }

    /// Drops connected components with fewer than `min_area` pixels.
    pub fn retain_components(&self, min_area: u32) -> Mask {
        let labeling = self.label();
        labeling.select(|_, area| area >= min_area)
    }

    pub fn largest_component(&self) -> Option<Mask> {
        let labeling = self.label();
        let (best, _) = labeling
            .areas
            .iter()
            .enumerate()
            .max_by_key(|(i, area)| (**area, std::cmp::Reverse(*i)))?;
        let wanted = best as u32 + 1;
        Some(labeling.select(|label, _| label == wanted))
    }

    /// Traces the outer boundary of the first component in raster order
    /// along pixel edges, clockwise on screen. Vertices are pixel corners.
    pub fn outer_contour(&self) -> Option<Polygon> {
        let first = self.data.iter().position(|v| *v)?;
        let x0 = (first % self.width as usize) as i32;
        let y0 = (first / self.width as usize) as i32;
        let start = (x0, y0);

        // Valid edge: inside pixel on the right, outside pixel on the left.
        let valid = |c: (i32, i32), d: (i32, i32)| {
            let r = (-d.1, d.0);
            let right = (
                (2 * c.0 + d.0 + r.0 - 1).div_euclid(2),
                (2 * c.1 + d.1 + r.1 - 1).div_euclid(2),
            );
            let left = (
                (2 * c.0 + d.0 - r.0 - 1).div_euclid(2),
                (2 * c.1 + d.1 - r.1 - 1).div_euclid(2),
            );
            self.get_i(right.0, right.1) && !self.get_i(left.0, left.1)
        };

        let max_steps = 4 * (self.width as usize + 1) * (self.height as usize + 1);
        let mut vertices = vec![Point::new(x0, y0)];
        let mut c = start;
        let mut d = (1, 0);
        for _ in 0..max_steps {
            c = (c.0 + d.0, c.1 + d.1);
            if c == start {
                return Some(Polygon::new(vertices));
            }
            let right_turn = (-d.1, d.0);
            let left_turn = (d.1, -d.0);
            let next = [right_turn, d, left_turn]
                .into_iter()
                .find(|nd| valid(c, *nd))?;
            if next != d {
                vertices.push(Point::new(c.0, c.1));
            }
            d = next;
        }
        tracing::warn!(x0, y0, "contour trace did not close");
        None
    }
}

pub struct Labeling {
    width: u32,
    height: u32,
    labels: Vec<u32>,
    areas: Vec<u32>,
}

impl Labeling {
    pub fn areas(&self) -> &[u32] {
        &self.areas
    }

    fn select(&self, keep: impl Fn(u32, u32) -> bool) -> Mask {
        let wanted: Vec<bool> = self
            .areas
            .iter()
            .enumerate()
            .map(|(i, area)| keep(i as u32 + 1, *area))
            .collect();
        Mask {
            width: self.width,
            height: self.height,
            data: self
                .labels
                .iter()
                .map(|l| *l != 0 && wanted[*l as usize - 1])
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(w: u32, h: u32, rects: &[(u32, u32, u32, u32)]) -> Mask {
        let mut m = Mask::new(w, h);
        for (x, y, rw, rh) in rects {
            m.fill_rect(*x, *y, *rw, *rh);
        }
        m
    }

    #[test]
    fn contour_of_rect_has_four_corners() {
        let m = blob(20, 20, &[(3, 4, 5, 6)]);
        let poly = m.outer_contour().unwrap();
        assert_eq!(
            poly.points(),
            &[
                Point::new(3, 4),
                Point::new(8, 4),
                Point::new(8, 10),
                Point::new(3, 10)
            ]
        );
        assert_eq!(poly.area(), 30.0);
        assert_eq!(Mask::from_polygon(20, 20, &poly), m);
    }

    #[test]
    fn contour_of_l_shape_round_trips_through_fill() {
        let m = blob(30, 30, &[(2, 2, 4, 12), (2, 10, 15, 4)]);
        let poly = m.outer_contour().unwrap();
        assert_eq!(poly.points().len(), 6);
        assert_eq!(poly.area(), m.count() as f64);
        assert_eq!(Mask::from_polygon(30, 30, &poly), m);
    }

    #[test]
    fn diagonal_pixels_are_separate_components() {
        let mut m = Mask::new(4, 4);
        m.set(0, 0, true);
        m.set(1, 1, true);
        assert_eq!(m.label().areas(), &[1, 1]);
        let poly = m.outer_contour().unwrap();
        assert_eq!(poly.area(), 1.0);
    }

    #[test]
    fn largest_component_and_retain() {
        let m = blob(40, 40, &[(0, 0, 3, 3), (10, 10, 10, 10)]);
        let largest = m.largest_component().unwrap();
        assert_eq!(largest.count(), 100);
        assert!(!largest.get(1, 1));
        assert_eq!(m.retain_components(50).count(), 100);
        assert_eq!(m.retain_components(5).count(), 109);
        assert!(Mask::new(5, 5).largest_component().is_none());
    }

    #[test]
    fn open_removes_specks_and_close_fills_holes() {
        let mut m = blob(30, 30, &[(5, 5, 15, 15)]);
        m.set(12, 12, false);
        m.set(25, 25, true);
        let cleaned = m.close(5).open(5);
        assert!(cleaned.get(12, 12));
        assert!(!cleaned.get(25, 25));
        assert!(cleaned.get(5, 5));
        assert!(!cleaned.get(4, 4));
    }

    #[test]
    fn erosion_does_not_eat_image_border() {
        let full = Mask::from_fn(6, 6, |_, _| true);
        assert_eq!(full.erode(5), full);
    }
}
