use crate::config::{AppConfig, FieldConfig};
use crate::perception::coverage::SoilCoverageDetector;
use crate::perception::mask::Mask;
use crate::perception::names;
use crate::perception::traits::TemplateSource;
use crate::perception::types::{FieldGeometry, FieldObservation, ScreenFrame};

/// Locates the farm field by fusing empty-tile template matches with the
/// crop segmentation.
#[derive(Debug, Clone)]
pub struct FieldDetector {
    coverage: SoilCoverageDetector,
    field: FieldConfig,
    tile_threshold: f32,
    silo_threshold: f32,
}

impl FieldDetector {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            coverage: SoilCoverageDetector::new(&cfg.field),
            field: cfg.field.clone(),
            tile_threshold: cfg.thresholds.field_tile,
            silo_threshold: cfg.thresholds.silo_watch,
        }
    }

    pub fn detect(&self, frame: &ScreenFrame, templates: &dyn TemplateSource) -> Option<FieldGeometry> {
        let crop = self.coverage.crop_mask(&frame.image);
        self.detect_with_crop(frame, templates, &crop)
    }

    fn detect_with_crop(
        &self,
        frame: &ScreenFrame,
        templates: &dyn TemplateSource,
        crop: &Mask,
    ) -> Option<FieldGeometry> {
        let mut combined = crop.clone();
        let tiles = templates.find_all(frame, names::FIELD, self.tile_threshold);
        for tile in &tiles {
            combined.fill_rect(tile.x, tile.y, tile.width, tile.height);
        }

        let region = combined.largest_component()?;
        let boundary = region.outer_contour()?;
        let area = boundary.area();
        let max_area = frame.width() as f64 * frame.height() as f64 * self.field.max_field_fraction;
        if area <= self.field.min_field_area || area >= max_area {
            tracing::debug!(
                area,
                min = self.field.min_field_area,
                max = max_area,
                tiles = tiles.len(),
                "field candidate rejected by area"
            );
            return None;
        }
        let center = boundary.centroid()?;
        tracing::trace!(x = center.x, y = center.y, area, vertices = boundary.points().len(), "field detected");
        Some(FieldGeometry { center, boundary })
    }

    /// Geometry, coverage, readiness and silo popup for one frame, sharing a
    /// single crop segmentation.
    pub fn observe(&self, frame: &ScreenFrame, templates: &dyn TemplateSource) -> FieldObservation {
        let crop = self.coverage.crop_mask(&frame.image);
        let field = self.detect_with_crop(frame, templates, &crop);
        let coverage = field
            .as_ref()
            .map_or(0.0, |f| SoilCoverageDetector::coverage_of(&crop, &f.boundary));
        let silo = templates.find_template(frame, names::SILO, self.silo_threshold);
        FieldObservation {
            ready_for_harvest: field.is_some() && coverage >= self.field.ready_coverage,
            field,
            coverage,
            silo_popup: silo.found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{DetectionResult, MatchBox, Point};
    use image::{Rgb, RgbImage};

    /// Reports fixed tile boxes and an optional silo popup.
    struct Tiles {
        boxes: Vec<MatchBox>,
        silo: bool,
    }

    impl TemplateSource for Tiles {
        fn find_template(&self, _: &ScreenFrame, name: &str, _: f32) -> DetectionResult {
            if name == names::SILO && self.silo {
                DetectionResult {
                    location: Some(Point::new(1, 1)),
                    confidence: 0.9,
                }
            } else {
                DetectionResult::NONE
            }
        }

        fn find_all(&self, _: &ScreenFrame, name: &str, _: f32) -> Vec<MatchBox> {
            if name == names::FIELD {
                self.boxes.clone()
            } else {
                Vec::new()
            }
        }
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.field.min_component_area = 20;
        cfg.field.min_field_area = 100.0;
        cfg
    }

    fn soil(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([120, 80, 50]))
    }

    #[test]
    fn tiles_and_crop_merge_into_one_field() {
        let mut img = soil(200, 200);
        for y in 60..100 {
            for x in 100..140 {
                img.put_pixel(x, y, Rgb([230, 200, 40]));
            }
        }
        let tiles = Tiles {
            boxes: vec![MatchBox { x: 60, y: 60, width: 40, height: 40 }],
            silo: false,
        };
        let det = FieldDetector::new(&config());
        let obs = det.observe(&ScreenFrame::new(img), &tiles);
        let field = obs.field.unwrap();
        assert_eq!(field.center, Point::new(100, 80));
        assert_eq!(field.boundary.area(), 3200.0);
        assert!((obs.coverage - 50.0).abs() < 0.01);
        assert!(obs.ready_for_harvest);
        assert!(!obs.silo_popup);
    }

    #[test]
    fn oversized_or_tiny_regions_are_rejected() {
        let det = FieldDetector::new(&config());
        let huge = Tiles {
            boxes: vec![MatchBox { x: 0, y: 0, width: 100, height: 60 }],
            silo: false,
        };
        assert!(det.detect(&ScreenFrame::new(soil(100, 100)), &huge).is_none());

        let tiny = Tiles {
            boxes: vec![MatchBox { x: 5, y: 5, width: 8, height: 8 }],
            silo: true,
        };
        let obs = det.observe(&ScreenFrame::new(soil(100, 100)), &tiny);
        assert!(obs.field.is_none());
        assert_eq!(obs.coverage, 0.0);
        assert!(!obs.ready_for_harvest);
        assert!(obs.silo_popup);
    }

    #[test]
    fn noisy_frame_without_field_yields_nothing() {
        let mut seed: u32 = 0x2545_f491;
        let img = RgbImage::from_fn(160, 120, |_, _| {
            let mut next = || {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((seed >> 24) % 100) as u8
            };
            Rgb([next(), next(), next()])
        });
        let tile = RgbImage::from_fn(24, 24, |x, y| {
            let v = if (x / 4 + y / 4) % 2 == 0 { 200 } else { 60 };
            Rgb([v, v / 2, 30])
        });
        let matcher = crate::perception::template::TemplateMatcher::from_images([(names::FIELD, tile)]);

        let obs = FieldDetector::new(&AppConfig::default()).observe(&ScreenFrame::new(img), &matcher);
        assert!(obs.field.is_none());
        assert_eq!(obs.coverage, 0.0);
        assert!(!obs.ready_for_harvest);
        assert!(!obs.silo_popup);
    }
}
