use image::{Rgb, RgbImage};

use crate::config::FieldConfig;
use crate::perception::mask::Mask;
use crate::perception::types::{Polygon, ScreenFrame};

/// 8-bit HSV with OpenCV scaling: H in [0,180), S and V in [0,255].
pub fn rgb_to_hsv(px: &Rgb<u8>) -> [u8; 3] {
    let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;
    let s = if v > 0.0 { diff / v * 255.0 } else { 0.0 };
    let mut h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }
    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round() as u8,
        v as u8,
    ]
}

/// Measures how much of a field region is covered by grown crop.
#[derive(Debug, Clone)]
pub struct SoilCoverageDetector {
    lower: [u8; 3],
    upper: [u8; 3],
    kernel: u32,
    min_component_area: u32,
}

impl SoilCoverageDetector {
    pub fn new(cfg: &FieldConfig) -> Self {
        Self {
            lower: cfg.hsv_lower,
            upper: cfg.hsv_upper,
            kernel: cfg.morph_kernel,
            min_component_area: cfg.min_component_area,
        }
    }

    fn in_band(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }

    /// Cleaned crop segmentation of the whole image.
    pub fn crop_mask(&self, image: &RgbImage) -> Mask {
        let raw = Mask::from_fn(image.width(), image.height(), |x, y| {
            self.in_band(rgb_to_hsv(image.get_pixel(x, y)))
        });
        raw.close(self.kernel)
            .open(self.kernel)
            .retain_components(self.min_component_area)
    }

    /// Percentage of `boundary` covered by `crop`, clamped to 100.
    pub fn coverage_of(crop: &Mask, boundary: &Polygon) -> f32 {
        let region = Mask::from_polygon(crop.width(), crop.height(), boundary);
        let total = region.count();
        if total == 0 {
            return 0.0;
        }
        let matched = crop.intersect(&region).count();
        ((matched as f64 / total as f64 * 100.0) as f32).min(100.0)
    }

    pub fn coverage(&self, frame: &ScreenFrame, boundary: Option<&Polygon>) -> f32 {
        let Some(boundary) = boundary else {
            return 0.0;
        };
        let crop = self.crop_mask(&frame.image);
        let pct = Self::coverage_of(&crop, boundary);
        tracing::trace!(coverage = pct, "soil coverage measured");
        pct
    }

    pub fn is_ready_for_harvest(&self, frame: &ScreenFrame, boundary: Option<&Polygon>, threshold: f32) -> bool {
        self.coverage(frame, boundary) >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHEAT: Rgb<u8> = Rgb([230, 200, 40]);
    const SOIL: Rgb<u8> = Rgb([120, 80, 50]);

    fn detector() -> SoilCoverageDetector {
        SoilCoverageDetector::new(&FieldConfig {
            min_component_area: 20,
            ..FieldConfig::default()
        })
    }

    fn field_with_wheat(width: u32) -> ScreenFrame {
        let mut img = RgbImage::from_pixel(100, 100, SOIL);
        for y in 20..80 {
            for x in 20..20 + width {
                img.put_pixel(x, y, WHEAT);
            }
        }
        ScreenFrame::new(img)
    }

    #[test]
    fn hsv_matches_opencv_scaling() {
        assert_eq!(rgb_to_hsv(&Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 0])), [0, 0, 0]);
        let wheat = rgb_to_hsv(&WHEAT);
        assert!((15..=35).contains(&wheat[0]));
    }

    #[test]
    fn coverage_grows_with_crop_and_caps_at_100() {
        let det = detector();
        let boundary = Polygon::rect(20, 20, 60, 60);
        let mut last = 0.0;
        for width in [0, 10, 30, 45, 60] {
            let pct = det.coverage(&field_with_wheat(width), Some(&boundary));
            assert!(pct >= last, "{pct} < {last} at width {width}");
            assert!(pct <= 100.0);
            last = pct;
        }
        assert!(last > 99.0);
    }

    #[test]
    fn no_boundary_means_zero() {
        let det = detector();
        assert_eq!(det.coverage(&field_with_wheat(60), None), 0.0);
        assert_eq!(det.coverage(&field_with_wheat(60), Some(&Polygon::new(vec![]))), 0.0);
    }

    #[test]
    fn small_specks_are_ignored() {
        let mut img = RgbImage::from_pixel(60, 60, SOIL);
        img.put_pixel(30, 30, WHEAT);
        img.put_pixel(31, 30, WHEAT);
        let det = detector();
        let pct = det.coverage(&ScreenFrame::new(img), Some(&Polygon::rect(0, 0, 60, 60)));
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn readiness_is_a_threshold_on_coverage() {
        let det = detector();
        let boundary = Polygon::rect(20, 20, 60, 60);
        let frame = field_with_wheat(15);
        assert!(det.is_ready_for_harvest(&frame, Some(&boundary), 20.0));
        assert!(!det.is_ready_for_harvest(&frame, Some(&boundary), 30.0));
    }
}
