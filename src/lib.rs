pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod perception;
pub mod planner;

#[cfg(feature = "native")]
pub use native::run;

#[cfg(feature = "native")]
mod native {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::agent_engine::control::EngineController;
    use crate::agent_engine::detection::DetectionTask;
    use crate::agent_engine::engine::EngineContext;
    use crate::agent_engine::event_bus::{log_events, EventBus};
    use crate::agent_engine::loop_control::{Attempt, RetryPolicy, StopSignal};
    use crate::agent_engine::state::SharedState;
    use crate::config::{self, AppConfig};
    use crate::errors::HayBotResult;
    use crate::executor::input::EnigoActuator;
    use crate::perception::field::FieldDetector;
    use crate::perception::screenshot::{CachedScreen, XcapGrabber};
    use crate::perception::template::TemplateMatcher;
    use crate::perception::traits::ScreenSource;

    /// Polls for the first field sighting before the workflow may start.
    const FIELD_WAIT_POLLS: u32 = 20;
    const FIELD_WAIT_INTERVAL: Duration = Duration::from_millis(500);

    pub async fn run() -> HayBotResult<()> {
        // Load .env file if present (ignore error if not found)
        let _ = dotenvy::dotenv();

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();

        let cfg = match config::load_or_init_config() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load config; using defaults");
                AppConfig::default()
            }
        };
        let cfg = Arc::new(cfg);

        let screen: Arc<dyn ScreenSource> = Arc::new(CachedScreen::new(XcapGrabber));
        let first = screen.capture(false).await?;
        let templates = Arc::new(TemplateMatcher::load(&cfg.templates, first.width(), first.height())?);
        tracing::info!(
            count = templates.len(),
            profile = templates.profile().unwrap_or("default"),
            "templates loaded"
        );

        let state = SharedState::new();
        let events = EventBus::default();
        tokio::spawn(log_events(events.subscribe()));

        let detection_stop = StopSignal::from_timing(&cfg.timing);
        let detection = DetectionTask::new(
            Arc::clone(&screen),
            templates.clone(),
            FieldDetector::new(&cfg),
            state.clone(),
            cfg.timing.clone(),
        );
        let detection_handle = tokio::spawn(detection.run(detection_stop.clone()));

        let ctx = EngineContext {
            stop: StopSignal::from_timing(&cfg.timing),
            config: Arc::clone(&cfg),
            screen,
            templates,
            actuator: Arc::new(EnigoActuator::new()?),
            state: state.clone(),
            events,
        };
        let controller = EngineController::new(ctx);

        let seen = RetryPolicy::new(FIELD_WAIT_POLLS, FIELD_WAIT_INTERVAL)
            .run(&detection_stop, |_| {
                let state = state.clone();
                async move {
                    Ok(if state.detection().field.is_some() {
                        Attempt::Done(())
                    } else {
                        Attempt::Retry
                    })
                }
            })
            .await?;
        if seen.is_none() {
            tracing::warn!("no field seen yet; start will be refused");
        }

        let outcome = match controller.start() {
            Ok(_) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received; stopping"),
                    _ = wait_until_stopped(&controller) => tracing::info!("workflow ended"),
                }
                controller.shutdown().await
            }
            Err(e) => Err(e),
        };

        detection_stop.stop();
        detection_handle.await?;
        outcome
    }

    async fn wait_until_stopped(controller: &EngineController) {
        while controller.is_running() {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}
