use std::sync::Arc;

use crate::agent_engine::loop_control::StopSignal;
use crate::agent_engine::state::SharedState;
use crate::config::{secs, TimingConfig};
use crate::errors::{HayBotError, HayBotResult};
use crate::perception::field::FieldDetector;
use crate::perception::traits::{ScreenSource, TemplateSource};

/// Background observer that keeps `DetectionState` fresh.
pub struct DetectionTask {
    screen: Arc<dyn ScreenSource>,
    templates: Arc<dyn TemplateSource>,
    detector: FieldDetector,
    state: SharedState,
    timing: TimingConfig,
}

impl DetectionTask {
    pub fn new(
        screen: Arc<dyn ScreenSource>,
        templates: Arc<dyn TemplateSource>,
        detector: FieldDetector,
        state: SharedState,
        timing: TimingConfig,
    ) -> Self {
        Self {
            screen,
            templates,
            detector,
            state,
            timing,
        }
    }

    /// Captures and analyses one frame. Geometry is left alone while a drag
    /// path is running.
    pub async fn tick(&self) -> HayBotResult<bool> {
        let frame = self.screen.capture(true).await?;
        if self.state.bot().path_execution_active {
            self.state.refresh_frame(frame);
            return Ok(false);
        }

        let detector = self.detector.clone();
        let templates = Arc::clone(&self.templates);
        let analysed = frame.clone();
        let obs = tokio::task::spawn_blocking(move || detector.observe(&analysed, templates.as_ref())).await?;
        let coverage = obs.coverage;
        let found = obs.field.is_some();
        let written = self.state.publish(frame, obs);
        if written {
            tracing::trace!(found, coverage, "detection published");
        }
        Ok(written)
    }

    /// Runs until `stop` is set.
    pub async fn run(self, stop: StopSignal) {
        tracing::info!("detection loop started");
        loop {
            let pause = match self.tick().await {
                Ok(_) => self.timing.detection_interval,
                Err(e) => {
                    tracing::warn!(error = %e, "detection error");
                    self.timing.detection_error_backoff
                }
            };
            match stop.sleep(secs(pause)).await {
                Ok(()) => {}
                Err(HayBotError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(error = %e, "detection loop sleep failed");
                    break;
                }
            }
        }
        tracing::info!("detection loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::perception::template::TemplateMatcher;
    use crate::perception::types::ScreenFrame;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticScreen {
        frame: ScreenFrame,
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl ScreenSource for StaticScreen {
        async fn capture(&self, _use_cache: bool) -> HayBotResult<ScreenFrame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HayBotError::Perception("no display".into()));
            }
            Ok(self.frame.clone())
        }
        fn invalidate(&self) {}
    }

    fn task(fail: bool) -> (DetectionTask, Arc<StaticScreen>, SharedState) {
        let cfg = AppConfig::default();
        let image = RgbImage::from_pixel(64, 64, Rgb([40, 120, 40]));
        let screen = Arc::new(StaticScreen {
            frame: ScreenFrame::new(image),
            calls: AtomicU32::new(0),
            fail,
        });
        let state = SharedState::new();
        let task = DetectionTask::new(
            screen.clone(),
            Arc::new(TemplateMatcher::new()),
            FieldDetector::new(&cfg),
            state.clone(),
            cfg.timing.clone(),
        );
        (task, screen, state)
    }

    #[tokio::test]
    async fn tick_publishes_when_idle() {
        let (task, _, state) = task(false);
        assert!(task.tick().await.unwrap());
        let d = state.detection();
        assert!(d.updated_at.is_some());
        assert!(d.field.is_none());
    }

    #[tokio::test]
    async fn tick_skips_geometry_during_path() {
        let (task, _, state) = task(false);
        state.update_bot(|b| b.path_execution_active = true);
        assert!(!task.tick().await.unwrap());
        let d = state.detection();
        assert!(d.frame.is_some());
        assert!(d.updated_at.is_none());
    }

    #[tokio::test]
    async fn loop_survives_errors_and_stops_on_signal() {
        let (task, screen, _) = task(true);
        let stop = StopSignal::new(std::time::Duration::from_millis(1));
        let remote = stop.clone();
        let handle = tokio::spawn(task.run(stop));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        remote.stop();
        handle.await.unwrap();
        assert!(screen.calls.load(Ordering::SeqCst) >= 1);
    }
}
