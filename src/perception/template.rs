//! Named reference images and coefficient-normalized cross-correlation.
//!
//! Scores follow the usual CCOEFF_NORMED definition with per-channel means,
//! clamped to `[0, 1]`. Flat windows and flat templates score 0. Large
//! templates are first searched on a downsampled pyramid level; the best
//! peaks there, plus every peak above a relaxed floor, are refined at full
//! resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;

use crate::config::TemplatesConfig;
use crate::errors::{HayBotError, HayBotResult};
use crate::perception::traits::TemplateSource;
use crate::perception::types::{DetectionResult, MatchBox, ScreenFrame};

const MAX_LEVELS: usize = 3;
/// Smallest template side allowed on a coarse level.
const MIN_COARSE_SIDE: usize = 8;
const COARSE_CANDIDATES: usize = 8;
/// Coarse peaks scoring at least this fraction of the threshold are refined.
const COARSE_FLOOR_RATIO: f32 = 0.5;
const MAX_MATCHES: usize = 64;
const FLAT_VARIANCE: f64 = 1e-3;

#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn downsample(&self) -> Plane {
        let (w, h) = (self.width / 2, self.height / 2);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let i = 2 * y * self.width + 2 * x;
                let sum = self.data[i]
                    + self.data[i + 1]
                    + self.data[i + self.width]
                    + self.data[i + self.width + 1];
                data.push(sum / 4.0);
            }
        }
        Plane {
            width: w,
            height: h,
            data,
        }
    }
}

fn color_planes(img: &RgbImage) -> Vec<Plane> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut planes: Vec<Plane> = (0..3)
        .map(|_| Plane {
            width: w,
            height: h,
            data: Vec::with_capacity(w * h),
        })
        .collect();
    for px in img.pixels() {
        for (c, plane) in planes.iter_mut().enumerate() {
            plane.data.push(px[c] as f32);
        }
    }
    planes
}

fn gray_planes(img: &RgbImage) -> Vec<Plane> {
    let data = img
        .pixels()
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .collect();
    vec![Plane {
        width: img.width() as usize,
        height: img.height() as usize,
        data,
    }]
}

fn downsample_all(planes: &[Plane]) -> Vec<Plane> {
    planes.iter().map(Plane::downsample).collect()
}

/// Summed-area tables of values and squared values for one plane.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(plane: &Plane) -> Self {
        let stride = plane.width + 1;
        let mut sum = vec![0.0; stride * (plane.height + 1)];
        let mut sq = vec![0.0; stride * (plane.height + 1)];
        for y in 0..plane.height {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..plane.width {
                let v = plane.data[y * plane.width + x] as f64;
                row_sum += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let (a, b, c, d) = (y * s + x, y * s + x + w, (y + h) * s + x, (y + h) * s + x + w);
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq[d] - self.sq[b] - self.sq[c] + self.sq[a],
        )
    }
}

/// Zero-mean template channels at one pyramid level.
#[derive(Debug, Clone)]
struct PreparedLevel {
    width: usize,
    height: usize,
    channels: Vec<Vec<f32>>,
    norm2: f64,
}

impl PreparedLevel {
    fn new(planes: &[Plane]) -> Self {
        let width = planes[0].width;
        let height = planes[0].height;
        let mut norm2 = 0.0;
        let channels = planes
            .iter()
            .map(|p| {
                let mean = p.data.iter().map(|v| *v as f64).sum::<f64>() / p.data.len().max(1) as f64;
                p.data
                    .iter()
                    .map(|v| {
                        let d = *v as f64 - mean;
                        norm2 += d * d;
                        d as f32
                    })
                    .collect()
            })
            .collect();
        Self {
            width,
            height,
            channels,
            norm2,
        }
    }

    fn is_flat(&self) -> bool {
        self.norm2 <= FLAT_VARIANCE * (self.width * self.height) as f64
    }
}

#[derive(Debug, Clone)]
struct TemplateImage {
    width: u32,
    height: u32,
    color: Vec<PreparedLevel>,
    gray: Vec<PreparedLevel>,
}

impl TemplateImage {
    fn new(img: &RgbImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            color: prepare_levels(color_planes(img)),
            gray: prepare_levels(gray_planes(img)),
        }
    }
}

fn prepare_levels(mut planes: Vec<Plane>) -> Vec<PreparedLevel> {
    let mut levels = vec![PreparedLevel::new(&planes)];
    while levels.len() <= MAX_LEVELS && planes[0].width.min(planes[0].height) / 2 >= MIN_COARSE_SIDE {
        planes = downsample_all(&planes);
        levels.push(PreparedLevel::new(&planes));
    }
    levels
}

/// A frame converted to float planes with every pyramid level it needs.
struct FrameLevels {
    levels: Vec<(Vec<Plane>, Vec<Integral>)>,
}

impl FrameLevels {
    fn new(base: Vec<Plane>, depth: usize) -> Self {
        let mut levels = Vec::with_capacity(depth + 1);
        let mut planes = base;
        for level in 0..=depth {
            if level > 0 {
                planes = downsample_all(&planes);
            }
            let integrals = planes.iter().map(Integral::new).collect();
            levels.push((planes.clone(), integrals));
        }
        Self { levels }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    x: usize,
    y: usize,
    score: f32,
}

fn score_at(planes: &[Plane], integrals: &[Integral], tpl: &PreparedLevel, x: usize, y: usize) -> f32 {
    if tpl.is_flat() {
        return 0.0;
    }
    let n = (tpl.width * tpl.height) as f64;
    let mut numerator = 0.0f64;
    let mut window_var = 0.0f64;
    for ((plane, integral), t) in planes.iter().zip(integrals).zip(&tpl.channels) {
        let (s, sq) = integral.window(x, y, tpl.width, tpl.height);
        window_var += sq - s * s / n;
        let mut acc = 0.0f64;
        for ty in 0..tpl.height {
            let start = (y + ty) * plane.width + x;
            let frow = &plane.data[start..start + tpl.width];
            let trow = &t[ty * tpl.width..(ty + 1) * tpl.width];
            acc += frow.iter().zip(trow).map(|(a, b)| a * b).sum::<f32>() as f64;
        }
        numerator += acc;
    }
    if window_var <= FLAT_VARIANCE * n {
        return 0.0;
    }
    let score = numerator / (tpl.norm2 * window_var).sqrt();
    score.clamp(0.0, 1.0) as f32
}

/// Greedy non-maximum suppression over positions sorted by descending score.
fn suppress(mut hits: Vec<Hit>, w: usize, h: usize, limit: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Hit> = Vec::new();
    for hit in hits {
        if kept.len() >= limit {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| hit.x.abs_diff(k.x) < w && hit.y.abs_diff(k.y) < h);
        if !overlaps {
            kept.push(hit);
        }
    }
    kept
}

/// Ranked, non-overlapping hits at full resolution. The strongest coarse
/// peaks are always refined, and so is every other peak at or above `floor`.
fn ranked_hits(frame: &FrameLevels, levels: &[PreparedLevel], floor: f32, limit: usize) -> Vec<Hit> {
    let (base_planes, _) = &frame.levels[0];
    let full = &levels[0];
    if full.width == 0
        || full.height == 0
        || full.width > base_planes[0].width
        || full.height > base_planes[0].height
    {
        return Vec::new();
    }

    // Deepest level where both template and frame still fit.
    let mut depth = (levels.len() - 1).min(frame.levels.len() - 1);
    while depth > 0 {
        let (planes, _) = &frame.levels[depth];
        if levels[depth].width <= planes[0].width && levels[depth].height <= planes[0].height {
            break;
        }
        depth -= 1;
    }

    let coarse = &levels[depth];
    let (planes, integrals) = &frame.levels[depth];
    let max_x = planes[0].width - coarse.width;
    let max_y = planes[0].height - coarse.height;
    let mut scored = Vec::with_capacity((max_x + 1) * (max_y + 1));
    for y in 0..=max_y {
        for x in 0..=max_x {
            scored.push(Hit {
                x,
                y,
                score: score_at(planes, integrals, coarse, x, y),
            });
        }
    }
    if depth == 0 {
        return suppress(scored, full.width, full.height, limit);
    }

    let (nms_w, nms_h) = ((coarse.width / 2).max(1), (coarse.height / 2).max(1));
    let above: Vec<Hit> = scored.iter().copied().filter(|h| h.score >= floor).collect();
    let mut candidates = suppress(scored, nms_w, nms_h, COARSE_CANDIDATES);
    for peak in suppress(above, nms_w, nms_h, usize::MAX) {
        if !candidates.iter().any(|c| c.x == peak.x && c.y == peak.y) {
            candidates.push(peak);
        }
    }

    let (planes, integrals) = &frame.levels[0];
    let max_x = planes[0].width - full.width;
    let max_y = planes[0].height - full.height;
    let scale = 1usize << depth;
    let refined = candidates
        .into_iter()
        .map(|c| {
            let (cx, cy) = (c.x * scale, c.y * scale);
            let mut best = Hit { x: cx.min(max_x), y: cy.min(max_y), score: 0.0 };
            for y in cy.saturating_sub(scale)..=(cy + scale).min(max_y) {
                for x in cx.saturating_sub(scale)..=(cx + scale).min(max_x) {
                    let score = score_at(planes, integrals, full, x, y);
                    if score > best.score {
                        best = Hit { x, y, score };
                    }
                }
            }
            best
        })
        .collect();
    suppress(refined, full.width, full.height, limit)
}

/// Chooses the template directory for a screen size: the matching profile
/// when its directory exists, else the default directory.
pub fn select_template_dir(cfg: &TemplatesConfig, width: u32, height: u32) -> (PathBuf, Option<String>) {
    match cfg.profiles.iter().find(|p| p.width == width && p.height == height) {
        Some(profile) if profile.dir.is_dir() => (profile.dir.clone(), Some(profile.name.clone())),
        Some(profile) => {
            tracing::warn!(
                profile = %profile.name,
                dir = %profile.dir.display(),
                "profile template directory missing; using default templates"
            );
            (cfg.default_dir.clone(), None)
        }
        None => {
            tracing::info!(width, height, "no resolution profile matches; using default templates");
            (cfg.default_dir.clone(), None)
        }
    }
}

/// Holds every loaded template and answers detection queries against frames.
#[derive(Debug, Clone, Default)]
pub struct TemplateMatcher {
    templates: HashMap<String, Arc<TemplateImage>>,
    profile: Option<String>,
}

impl TemplateMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the template catalogue for the given screen size.
    pub fn load(cfg: &TemplatesConfig, width: u32, height: u32) -> HayBotResult<Self> {
        let (dir, profile) = select_template_dir(cfg, width, height);
        if !dir.is_dir() {
            return Err(HayBotError::Template(format!(
                "template directory {} does not exist",
                dir.display()
            )));
        }
        let mut matcher = Self::from_dir(&dir, &cfg.files);
        matcher.profile = profile;
        tracing::info!(
            dir = %dir.display(),
            profile = matcher.profile.as_deref().unwrap_or("default"),
            loaded = matcher.templates.len(),
            expected = cfg.files.len(),
            "templates loaded"
        );
        Ok(matcher)
    }

    fn from_dir<'a>(dir: &Path, files: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut matcher = Self::new();
        for (name, file) in files {
            let path = dir.join(file);
            if !path.is_file() {
                tracing::warn!(template = %name, path = %path.display(), "template file missing");
                continue;
            }
            match image::open(&path) {
                Ok(img) => matcher.insert(name, img.to_rgb8()),
                Err(e) => {
                    tracing::warn!(template = %name, path = %path.display(), error = %e, "template unreadable");
                }
            }
        }
        matcher
    }

    pub fn insert(&mut self, name: impl Into<String>, image: RgbImage) {
        self.templates
            .insert(name.into(), Arc::new(TemplateImage::new(&image)));
    }

    pub fn from_images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = (S, RgbImage)>,
        S: Into<String>,
    {
        let mut matcher = Self::new();
        for (name, img) in images {
            matcher.insert(name, img);
        }
        matcher
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    fn best(frame: &RgbImage, levels: &[PreparedLevel], gray: bool, threshold: f32) -> Option<Hit> {
        let base = if gray { gray_planes(frame) } else { color_planes(frame) };
        let frame_levels = FrameLevels::new(base, levels.len() - 1);
        ranked_hits(&frame_levels, levels, threshold * COARSE_FLOOR_RATIO, 1)
            .into_iter()
            .next()
    }
}

impl TemplateSource for TemplateMatcher {
    fn find_template(&self, frame: &ScreenFrame, name: &str, threshold: f32) -> DetectionResult {
        let Some(tpl) = self.templates.get(name) else {
            tracing::debug!(template = name, "unknown template");
            return DetectionResult::NONE;
        };
        let to_result = |hit: Hit| DetectionResult {
            location: Some(
                MatchBox {
                    x: hit.x as u32,
                    y: hit.y as u32,
                    width: tpl.width,
                    height: tpl.height,
                }
                .center(),
            ),
            confidence: hit.score,
        };

        let color = Self::best(&frame.image, &tpl.color, false, threshold);
        let color_score = color.map_or(0.0, |h| h.score);
        if let Some(hit) = color.filter(|h| h.score >= threshold) {
            return to_result(hit);
        }

        let gray = Self::best(&frame.image, &tpl.gray, true, threshold);
        let gray_score = gray.map_or(0.0, |h| h.score);
        if let Some(hit) = gray.filter(|h| h.score >= threshold) {
            tracing::trace!(template = name, color_score, gray_score, "matched in grayscale");
            return to_result(hit);
        }

        DetectionResult {
            location: None,
            confidence: color_score.max(gray_score),
        }
    }

    /// Every non-overlapping instance, matched on luminance so tinted
    /// copies still count.
    fn find_all(&self, frame: &ScreenFrame, name: &str, threshold: f32) -> Vec<MatchBox> {
        let Some(tpl) = self.templates.get(name) else {
            return Vec::new();
        };
        let frame_levels = FrameLevels::new(gray_planes(&frame.image), tpl.gray.len() - 1);
        ranked_hits(&frame_levels, &tpl.gray, threshold * COARSE_FLOOR_RATIO, MAX_MATCHES)
            .into_iter()
            .filter(|h| h.score >= threshold)
            .map(|h| MatchBox {
                x: h.x as u32,
                y: h.y as u32,
                width: tpl.width,
                height: tpl.height,
            })
            .collect()
    }
}
