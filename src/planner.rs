use serde::{Deserialize, Serialize};

use crate::config::{PathConfig, PathSpacing};
use crate::perception::types::{Point, Polygon};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    Plant,
    Harvest,
}

/// Builds drag paths that sweep a field with horizontal then vertical scan
/// lines. Output is deterministic for identical inputs.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    plant: PathSpacing,
    harvest: PathSpacing,
}

impl PathPlanner {
    pub fn new(cfg: &PathConfig) -> Self {
        Self {
            plant: cfg.plant,
            harvest: cfg.harvest,
        }
    }

    pub fn spacing(&self, mode: PathMode) -> PathSpacing {
        match mode {
            PathMode::Plant => self.plant,
            PathMode::Harvest => self.harvest,
        }
    }

    /// Path starting and ending at `center`. Every intermediate point lies
    /// inside or on `boundary`.
    pub fn plan(&self, center: Point, boundary: Option<&Polygon>, mode: PathMode) -> Vec<Point> {
        let Some((boundary, b)) = boundary.and_then(|p| p.bounds().map(|b| (p, b))) else {
            return vec![center];
        };
        let sp = self.spacing(mode);
        let sample = sp.sample_step.max(1);
        let half = sp.line_spacing / 2;
        let mut path = vec![center];

        let mut y = b.min_y + half;
        while y <= b.max_y - half {
            let inside: Vec<i32> = stepped(b.min_x, b.max_x, sample)
                .filter(|x| boundary.contains(Point::new(*x, y)))
                .collect();
            if let (Some(&left), Some(&right)) = (inside.first(), inside.last()) {
                path.extend(
                    stepped(left, right, sp.line_step.max(1))
                        .map(|x| Point::new(x, y))
                        .filter(|p| boundary.contains(*p)),
                );
            }
            y += sp.line_spacing.max(1);
        }

        let mut x = b.min_x + half;
        while x < b.max_x {
            let inside: Vec<i32> = stepped(b.min_y, b.max_y, sample)
                .filter(|y| boundary.contains(Point::new(x, *y)))
                .collect();
            if let (Some(&top), Some(&bottom)) = (inside.first(), inside.last()) {
                path.extend(
                    stepped(top, bottom, sp.vertical_step.max(1))
                        .map(|y| Point::new(x, y))
                        .filter(|p| boundary.contains(*p)),
                );
            }
            x += sp.vertical_spacing.max(1);
        }

        path.push(center);
        path
    }
}

/// `from..=to` in increments of `step`.
fn stepped(from: i32, to: i32, step: i32) -> impl Iterator<Item = i32> {
    (from..=to).step_by(step as usize)
}
