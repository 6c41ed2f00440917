use std::sync::Arc;

use crate::agent_engine::event_bus::{EngineEvent, EventBus};
use crate::agent_engine::loop_control::{Attempt, RetryPolicy, StopSignal};
use crate::agent_engine::state::{SharedState, WorkflowStep};
use crate::config::{secs, AppConfig};
use crate::errors::{HayBotError, HayBotResult};
use crate::executor::input::Actuator;
use crate::perception::location::{Classification, Location, LocationClassifier};
use crate::perception::names;
use crate::perception::traits::{ScreenSource, TemplateSource};
use crate::perception::types::{DetectionResult, Point, ScreenFrame};
use crate::planner::PathPlanner;

/// Everything the workflow and detection tasks share.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<AppConfig>,
    pub screen: Arc<dyn ScreenSource>,
    pub templates: Arc<dyn TemplateSource>,
    pub actuator: Arc<dyn Actuator>,
    pub state: SharedState,
    pub stop: StopSignal,
    pub events: EventBus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// The persistent silo-full branch ran instead of farming.
    SiloDeposit,
    Skipped(&'static str),
}

/// Top-level farming state machine. One instance drives one run of the
/// workflow task.
pub struct WorkflowEngine {
    pub(crate) ctx: EngineContext,
    pub(crate) classifier: LocationClassifier,
    pub(crate) planner: PathPlanner,
    cycle: u64,
}

impl WorkflowEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            classifier: LocationClassifier::new(&ctx.config),
            planner: PathPlanner::new(&ctx.config.path),
            ctx,
            cycle: 0,
        }
    }

    pub(crate) fn cfg(&self) -> &AppConfig {
        &self.ctx.config
    }

    pub async fn run_loop(&mut self) {
        self.ctx.events.emit(EngineEvent::Started);
        tracing::info!("workflow engine started");

        loop {
            if !self.ctx.state.bot().running || self.ctx.stop.is_stopped() {
                break;
            }
            match self.run_cycle().await {
                Ok(outcome) => {
                    tracing::debug!(cycle = self.cycle, outcome = ?outcome, "cycle finished");
                }
                Err(HayBotError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(cycle = self.cycle, error = %e, "critical workflow error; stopping");
                    self.ctx.state.update_bot(|b| b.running = false);
                    self.ctx.stop.stop();
                    self.ctx.events.emit(EngineEvent::Stopped {
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }

        self.ctx.state.update_bot(|b| b.running = false);
        self.ctx.events.emit(EngineEvent::Stopped {
            reason: "stop requested".into(),
        });
        tracing::info!(cycles = self.cycle, "workflow engine stopped");
    }

    fn enter(&self, step: WorkflowStep) {
        tracing::debug!(cycle = self.cycle, step = ?step, "workflow step");
        self.ctx.events.emit(EngineEvent::Step {
            cycle: self.cycle,
            step,
        });
    }

    pub async fn run_cycle(&mut self) -> HayBotResult<CycleOutcome> {
        self.cycle += 1;
        self.ctx.events.emit(EngineEvent::CycleStarted { cycle: self.cycle });
        tracing::info!(cycle = self.cycle, "cycle started");
        let timing = self.cfg().timing.clone();

        self.enter(WorkflowStep::AcquireScreen);
        let mut frame = self.capture_past_loading().await?;
        self.pause(timing.post_capture_pause).await?;

        self.enter(WorkflowStep::HandleBlockingPopups);
        if self.handle_unknown_popup(&frame).await? {
            tracing::info!("unknown popup handled; refreshing screen");
            frame = self.capture_past_loading().await?;
            self.pause(timing.post_capture_pause).await?;
        }

        let silo = self
            .find(&frame, names::SILO, self.cfg().thresholds.silo_popup)
            .await?;
        if silo.found() {
            tracing::info!(confidence = silo.confidence, "silo full popup detected");
            self.ctx.state.update_bot(|b| {
                b.silo_full = true;
                b.wheat_sold_this_session = false;
            });
            if self.close_silo_popup(&frame).await? {
                self.ctx.state.update_detection(|d| d.silo_popup = false);
            } else {
                tracing::warn!("failed to close silo popup");
                self.pause(timing.short_retry_delay).await?;
                return Ok(CycleOutcome::Skipped("silo popup could not be closed"));
            }
        }

        self.enter(WorkflowStep::CheckPersistentSiloFull);
        let bot = self.ctx.state.bot();
        if bot.silo_full && !bot.wheat_sold_this_session {
            tracing::info!("silo persistently full; visiting market before any planting");
            if self.market_workflow().await? {
                let cleared = self.ctx.state.update_bot(|b| {
                    if b.wheat_sold_this_session {
                        b.silo_full = false;
                        b.wheat_sold_this_session = false;
                        true
                    } else {
                        false
                    }
                });
                if cleared {
                    tracing::info!("wheat posted to market; silo state cleared");
                } else {
                    tracing::warn!("no wheat posted; keeping silo full state");
                }
            } else {
                tracing::warn!("market workflow failed; keeping silo full state");
            }
            self.return_to_main().await?;
            return Ok(CycleOutcome::SiloDeposit);
        } else if bot.silo_full {
            tracing::info!("silo was full but wheat was posted; clearing silo state");
            self.ctx.state.update_bot(|b| {
                b.silo_full = false;
                b.wheat_sold_this_session = false;
            });
        }

        self.enter(WorkflowStep::EnsureMainPage);
        if !self.ensure_main().await? {
            tracing::warn!("cannot reach main page; skipping cycle");
            self.pause(timing.retry_delay).await?;
            return Ok(CycleOutcome::Skipped("main page unreachable"));
        }

        self.enter(WorkflowStep::EvaluatePlanting);
        if self.needs_planting() {
            if self.comprehensive_planting().await? {
                tracing::info!(growth_secs = timing.growth_time, "fields planted; waiting for growth");
                self.growth_wait().await?;
            } else {
                tracing::warn!("comprehensive planting failed");
                self.pause(timing.retry_delay).await?;
                return Ok(CycleOutcome::Skipped("planting failed"));
            }
        }

        self.enter(WorkflowStep::EvaluateHarvest);
        if !self.ensure_main().await? {
            tracing::warn!("cannot reach main page for harvest");
            self.pause(timing.short_retry_delay).await?;
            return Ok(CycleOutcome::Skipped("main page unreachable for harvest"));
        }
        let detection = self.ctx.state.detection();
        let min_coverage = self.cfg().field.harvest_min_coverage;
        if let Some(field) = detection.field {
            if detection.ready_for_harvest && detection.coverage > min_coverage {
                tracing::info!(coverage = detection.coverage, "crop ready; harvesting");
                if !self.harvest(field.center, &field.boundary).await? {
                    tracing::warn!("harvest failed");
                    self.pause(timing.retry_delay).await?;
                    return Ok(CycleOutcome::Skipped("harvest failed"));
                }
            }
        }

        self.enter(WorkflowStep::CheckMarketTrigger);
        let frame = self.capture_past_loading().await?;
        let collect = self
            .find(&frame, names::COLLECT, self.cfg().thresholds.collect_button)
            .await?;
        if collect.found() {
            tracing::info!(confidence = collect.confidence, "sold items waiting; visiting market");
            if !self.market_workflow().await? {
                tracing::warn!("market workflow failed");
                self.pause(timing.retry_delay).await?;
                return Ok(CycleOutcome::Skipped("market workflow failed"));
            }
        }

        self.enter(WorkflowStep::Idle);
        self.pause(timing.cycle_pause).await?;
        Ok(CycleOutcome::Completed)
    }

    // ── Perception and actuation helpers ────────────────────────────────

    pub(crate) async fn pause(&self, seconds: f64) -> HayBotResult<()> {
        self.ctx.stop.sleep(secs(seconds)).await
    }

    pub(crate) async fn capture(&self) -> HayBotResult<ScreenFrame> {
        self.ctx.screen.capture(false).await
    }

    /// Template lookup on the blocking pool.
    pub(crate) async fn find(&self, frame: &ScreenFrame, name: &str, threshold: f32) -> HayBotResult<DetectionResult> {
        let templates = Arc::clone(&self.ctx.templates);
        let frame = frame.clone();
        let name = name.to_string();
        let result = tokio::task::spawn_blocking(move || templates.find_template(&frame, &name, threshold)).await?;
        Ok(result)
    }

    pub(crate) async fn classify(&self, frame: &ScreenFrame) -> HayBotResult<Option<Classification>> {
        let templates = Arc::clone(&self.ctx.templates);
        let classifier = self.classifier.clone();
        let frame = frame.clone();
        let result = tokio::task::spawn_blocking(move || classifier.classify(templates.as_ref(), &frame)).await?;
        self.ctx.events.emit(EngineEvent::LocationResolved {
            location: result.map(|c| c.location),
            confidence: result.map_or(0.0, |c| c.confidence),
        });
        Ok(result)
    }

    /// Clicks unless the engine has been stopped, then waits the click delay.
    pub(crate) async fn safe_click(&self, at: Point, target: &str) -> HayBotResult<bool> {
        if !self.ctx.state.bot().running || self.ctx.stop.is_stopped() {
            tracing::debug!(target, "click refused: engine stopped");
            return Ok(false);
        }
        tracing::info!(target, x = at.x, y = at.y, "click");
        let timing = &self.cfg().timing;
        self.ctx.actuator.click(at, secs(timing.move_duration))?;
        self.ctx.events.emit(EngineEvent::Click {
            target: target.to_string(),
            at,
        });
        self.pause(timing.click_delay).await?;
        Ok(true)
    }

    /// Moves the pointer unless the engine has been stopped, then waits out
    /// the move's own duration so drags keep their pace on any backend.
    pub(crate) async fn safe_move(&self, at: Point, seconds: f64, target: &str) -> HayBotResult<bool> {
        if !self.ctx.state.bot().running || self.ctx.stop.is_stopped() {
            tracing::debug!(target, "move refused: engine stopped");
            return Ok(false);
        }
        self.ctx.actuator.move_to(at, secs(seconds))?;
        self.pause(seconds).await?;
        Ok(true)
    }

    /// Keeps a sub-workflow failure local: cancellation still propagates,
    /// any other error becomes a warning and `false`.
    pub(crate) fn contain(&self, what: &str, result: HayBotResult<bool>) -> HayBotResult<bool> {
        match result {
            Ok(done) => Ok(done),
            Err(HayBotError::Cancelled) => Err(HayBotError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, workflow = what, "sub-workflow error");
                self.ctx.events.emit(EngineEvent::Warning {
                    message: format!("{what}: {e}"),
                });
                Ok(false)
            }
        }
    }

    /// Finds `name` and clicks it; `false` when absent.
    pub(crate) async fn click_template(&self, frame: &ScreenFrame, name: &str, threshold: f32) -> HayBotResult<bool> {
        let hit = self.find(frame, name, threshold).await?;
        match hit.location {
            Some(at) => {
                tracing::debug!(template = name, confidence = hit.confidence, threshold, "template found");
                self.safe_click(at, name).await
            }
            None => {
                tracing::debug!(template = name, confidence = hit.confidence, threshold, "template absent");
                Ok(false)
            }
        }
    }

    /// Handles a loading screen if one is showing; returns whether it did.
    pub(crate) async fn dismiss_loading(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        let t = &self.cfg().thresholds;
        let loading = self.find(frame, names::LOADING, t.loading_screen).await?;
        if !loading.found() {
            return Ok(false);
        }
        tracing::info!(confidence = loading.confidence, "loading screen detected");
        let timing = self.cfg().timing.clone();
        if self.click_template(frame, names::CLICK, t.click_escape).await? {
            self.pause(timing.loading_escape_wait).await?;
        } else {
            tracing::info!("no escape point on loading screen; waiting");
            self.pause(timing.loading_wait).await?;
        }
        Ok(true)
    }

    pub(crate) async fn capture_past_loading(&self) -> HayBotResult<ScreenFrame> {
        let frame = self.capture().await?;
        if self.dismiss_loading(&frame).await? {
            self.pause(self.cfg().timing.loading_settle).await?;
            return self.capture().await;
        }
        Ok(frame)
    }

    // ── Recovery ────────────────────────────────────────────────────────

    /// A close affordance with no recognizable page behind it.
    async fn handle_unknown_popup(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        match self.classify(frame).await? {
            Some(Classification {
                location: Location::DialogOpen,
                confidence,
            }) => {
                tracing::info!(confidence, "unknown popup detected; closing");
                let closed = self
                    .click_template(frame, names::CLOSE, self.cfg().thresholds.close_button)
                    .await?;
                if closed {
                    self.pause(self.cfg().timing.popup_close_delay).await?;
                }
                Ok(closed)
            }
            _ => Ok(false),
        }
    }

    async fn close_silo_popup(&self, frame: &ScreenFrame) -> HayBotResult<bool> {
        if self
            .click_template(frame, names::CLOSE, self.cfg().thresholds.close_button)
            .await?
        {
            tracing::info!("silo popup closed; silo full state kept until wheat is sold");
            self.pause(self.cfg().timing.silo_close_wait).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) async fn ensure_main(&self) -> HayBotResult<bool> {
        let policy = RetryPolicy::new(self.cfg().retries.ensure_main, std::time::Duration::ZERO);
        let confirmed = policy
            .run(&self.ctx.stop, move |attempt| async move {
                let frame = self.capture().await?;
                if let Some(c) = self.classify(&frame).await? {
                    if c.location == Location::Main {
                        tracing::debug!(confidence = c.confidence, "on main page");
                        return Ok(Attempt::Done(()));
                    }
                }
                tracing::info!(attempt = attempt + 1, "not on main page; attempting return");
                if self.return_to_main().await? {
                    self.pause(self.cfg().timing.ensure_main_settle).await?;
                } else {
                    self.pause(self.cfg().timing.ensure_main_retry_pause).await?;
                }
                Ok(Attempt::Retry)
            })
            .await?;
        if confirmed.is_none() {
            tracing::warn!(attempts = policy.max_attempts, "could not ensure main page");
        }
        Ok(confirmed.is_some())
    }

    /// Closes whatever known surface is on top until the main page shows.
    pub(crate) async fn return_to_main(&self) -> HayBotResult<bool> {
        let policy = RetryPolicy::new(self.cfg().retries.return_to_main, std::time::Duration::ZERO);
        let close = self.cfg().thresholds.close_button;
        let recovery = self.cfg().timing.recovery_pause;
        let reached = policy
            .run(&self.ctx.stop, move |attempt| async move {
                let frame = self.capture().await?;
                let location = self.classify(&frame).await?.map(|c| c.location);
                let handled = match location {
                    Some(Location::Main) => return Ok(Attempt::Done(())),
                    Some(Location::Market) => self.close_market(&frame).await?,
                    Some(Location::SiloPopup | Location::Offer | Location::PaperPage | Location::DialogOpen) => {
                        self.click_template(&frame, names::CLOSE, close).await?
                    }
                    None => false,
                };
                if handled {
                    tracing::debug!(location = ?location, "closed surface on the way to main");
                    self.pause(recovery).await?;
                } else {
                    tracing::info!(attempt = attempt + 1, location = ?location, "unknown location; waiting");
                    self.pause(self.cfg().timing.unknown_location_wait).await?;
                }
                Ok(Attempt::Retry)
            })
            .await?;
        if reached.is_none() {
            tracing::warn!(attempts = policy.max_attempts, "could not return to main page");
        }
        Ok(reached.is_some())
    }

    /// Waits out crop growth, optionally tending the market meanwhile.
    async fn growth_wait(&self) -> HayBotResult<()> {
        let timing = self.cfg().timing.clone();
        let total = secs(timing.growth_time);
        if !self.cfg().market.manage_during_growth {
            tracing::info!("market management during growth disabled; plain wait");
            return self.ctx.stop.sleep(total).await;
        }

        let started = std::time::Instant::now();
        let interval = secs(timing.market_check_interval);
        let mut last_check = std::time::Duration::ZERO;
        while started.elapsed() < total {
            let elapsed = started.elapsed();
            if elapsed.saturating_sub(last_check) >= interval {
                tracing::info!(
                    elapsed = elapsed.as_secs(),
                    remaining = total.saturating_sub(elapsed).as_secs(),
                    "market check during growth"
                );
                self.tend_market_during_growth().await?;
                last_check = elapsed;
            }
            self.pause(timing.growth_poll_interval).await?;
        }
        tracing::info!(growth_secs = timing.growth_time, "growth period completed");
        Ok(())
    }
}
