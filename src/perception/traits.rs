use async_trait::async_trait;

use crate::errors::HayBotResult;
use crate::perception::types::{DetectionResult, MatchBox, ScreenFrame};

/// Strategy trait for named-template detection.
/// `TemplateMatcher` is the image-based implementation; tests script it.
pub trait TemplateSource: Send + Sync {
    fn find_template(&self, frame: &ScreenFrame, name: &str, threshold: f32) -> DetectionResult;

    fn find_all(&self, frame: &ScreenFrame, name: &str, threshold: f32) -> Vec<MatchBox>;
}

/// Supplies screen frames to the perception layer.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    /// Returns a recent frame; with `use_cache` a frame younger than the
    /// cache window may be reused.
    async fn capture(&self, use_cache: bool) -> HayBotResult<ScreenFrame>;

    /// Forces the next capture to grab a fresh frame.
    fn invalidate(&self);
}
