// Planting and harvesting drags over the detected field.
use crate::agent_engine::engine::WorkflowEngine;
use crate::agent_engine::event_bus::EngineEvent;
use crate::config::Offset;
use crate::errors::HayBotResult;
use crate::executor::pointer::PointerGuard;
use crate::perception::location::Location;
use crate::perception::types::{Point, Polygon};
use crate::planner::PathMode;

impl WorkflowEngine {
    /// True when a field is known and its coverage is below the planting
    /// threshold. No field means nothing to plant.
    pub(crate) fn needs_planting(&self) -> bool {
        let detection = self.ctx.state.detection();
        if detection.field.is_none() {
            tracing::warn!("no field detected; skipping planting check");
            return false;
        }
        detection.coverage < self.cfg().field.plant_below_coverage
    }

    /// Latest field geometry, falling back to what the caller already had.
    fn current_geometry(&self, center: Point, boundary: &Polygon) -> (Point, Polygon) {
        match self.ctx.state.detection().field {
            Some(field) => (field.center, field.boundary),
            None => (center, boundary.clone()),
        }
    }

    /// One planting pass. Actuation failures end the pass, not the engine.
    pub(crate) async fn plant(&self, center: Point, boundary: &Polygon) -> HayBotResult<bool> {
        let result = self.plant_pass(center, boundary).await;
        self.contain("planting", result)
    }

    async fn plant_pass(&self, center: Point, boundary: &Polygon) -> HayBotResult<bool> {
        let timing = self.cfg().timing.clone();
        tracing::info!(x = center.x, y = center.y, "planting");
        if !self.safe_click(center, "field center").await? {
            return Ok(false);
        }
        self.pause(timing.screen_center_delay).await?;
        self.capture().await?;

        let (center, boundary) = self.current_geometry(center, boundary);
        let seed = offset(center, self.cfg().offsets.seed);
        if !self.safe_click(seed, "seed").await? {
            return Ok(false);
        }
        self.pause(timing.seed_select_wait).await?;

        let (center, boundary) = self.current_geometry(center, &boundary);
        let path = self.planner.plan(center, Some(&boundary), PathMode::Plant);
        self.follow_path(center, self.cfg().offsets.initial_plant, &path, PathMode::Plant)
            .await
    }

    pub(crate) async fn harvest(&self, center: Point, boundary: &Polygon) -> HayBotResult<bool> {
        let result = self.harvest_pass(center, boundary).await;
        self.contain("harvest", result)
    }

    async fn harvest_pass(&self, center: Point, boundary: &Polygon) -> HayBotResult<bool> {
        let timing = self.cfg().timing.clone();
        tracing::info!(x = center.x, y = center.y, "harvesting");
        if !self.safe_click(center, "field center").await? {
            return Ok(false);
        }
        let tool = offset(center, self.cfg().offsets.harvest_tool);
        if !self.safe_move(tool, timing.move_duration, "harvest tool").await? {
            return Ok(false);
        }
        self.pause(timing.seed_select_wait).await?;

        let (center, boundary) = self.current_geometry(center, boundary);
        let path = self.planner.plan(center, Some(&boundary), PathMode::Harvest);
        self.follow_path(center, self.cfg().offsets.initial_harvest, &path, PathMode::Harvest)
            .await
    }

    /// Drags through `path` with the pointer held. The path is fixed before
    /// the press so geometry updates cannot change it mid-drag.
    async fn follow_path(&self, center: Point, start: Offset, path: &[Point], mode: PathMode) -> HayBotResult<bool> {
        let timing = self.cfg().timing.clone();
        let log_every = self.cfg().path.progress_log_interval.max(1);
        let guard = PointerGuard::engage(self.ctx.actuator.as_ref(), &self.ctx.state)?;

        let mut done = 0;
        let mut completed = self
            .safe_move(offset(center, start), timing.drag_start_duration, "drag start")
            .await?;
        if completed {
            self.pause(timing.initial_drag_wait).await?;
            for (i, point) in path.iter().enumerate() {
                if i % log_every == 0 {
                    tracing::debug!(mode = ?mode, point = i + 1, total = path.len(), "path progress");
                }
                if !self.safe_move(*point, timing.path_move_duration, "path").await? {
                    completed = false;
                    break;
                }
                done = i + 1;
                tokio::task::yield_now().await;
            }
        }
        if completed && !self.safe_move(center, timing.move_duration, "field center").await? {
            completed = false;
        }
        if !completed {
            tracing::info!(done, total = path.len(), "path interrupted by stop");
        }
        drop(guard);

        tracing::info!(mode = ?mode, points = path.len(), completed, "path executed");
        self.ctx.events.emit(EngineEvent::PathExecuted {
            mode,
            points: path.len(),
            completed,
        });
        Ok(completed)
    }

    /// Repeats planting until coverage clears the threshold or the attempt
    /// bound is reached.
    pub(crate) async fn comprehensive_planting(&self) -> HayBotResult<bool> {
        let max_attempts = self.cfg().retries.planting;
        let timing = self.cfg().timing.clone();

        for attempt in 1..=max_attempts {
            tracing::info!(attempt, max_attempts, "planting attempt");
            let frame = self.capture().await?;
            let on_main = matches!(
                self.classify(&frame).await?,
                Some(c) if c.location == Location::Main
            );
            if !on_main && !self.return_to_main().await? {
                tracing::warn!(attempt, "cannot return to main page for planting");
                continue;
            }

            if !self.needs_planting() {
                tracing::info!("field fully planted");
                return Ok(true);
            }

            let before = self.ctx.state.detection();
            let Some(field) = before.field else {
                tracing::warn!(attempt, "field vanished before planting");
                self.pause(timing.planting_retry_pause).await?;
                continue;
            };

            if !self.plant(field.center, &field.boundary).await? {
                tracing::warn!(attempt, "planting attempt failed");
                self.pause(timing.planting_retry_pause).await?;
                continue;
            }
            self.pause(timing.planting_settle).await?;

            let after = self.ctx.state.detection().coverage;
            self.ctx.events.emit(EngineEvent::PlantingAttempt {
                attempt,
                coverage_before: before.coverage,
                coverage_after: after,
            });
            if !self.needs_planting() {
                tracing::info!(attempt, coverage = after, "planting complete");
                return Ok(true);
            }
            let delta = after - before.coverage;
            if delta > self.cfg().field.planting_progress_delta {
                tracing::info!(delta, "planting progressed; continuing");
            } else {
                tracing::info!(delta, "little planting progress; retrying");
            }
        }

        let done = !self.needs_planting();
        if !done {
            tracing::warn!(max_attempts, "field still under-planted after all attempts");
        }
        Ok(done)
    }
}

fn offset(p: Point, o: Offset) -> Point {
    p.offset(o.dx, o.dy)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::agent_engine::engine::WorkflowEngine;
    use crate::agent_engine::testkit::{FakeGame, Page};
    use crate::planner::PathMode;

    #[tokio::test]
    async fn planting_gives_up_after_bounded_attempts() {
        let game = FakeGame::new(Page::Main);
        game.set_field(45.0, false);
        let engine = game.engine();
        assert!(!engine.comprehensive_planting().await.unwrap());
        assert_eq!(game.with(|g| g.pointer_downs), engine.cfg().retries.planting);
        assert!(!game.ctx.state.bot().path_execution_active);
    }

    #[tokio::test]
    async fn planting_clicks_center_then_seed_then_drags() {
        let game = FakeGame::new(Page::Main);
        game.set_field(45.0, false);
        game.with(|g| g.coverage_after_plant = Some(90.0));
        let engine = game.engine();
        assert!(engine.comprehensive_planting().await.unwrap());

        let (clicks, moves) = game.with(|g| (g.clicks.clone(), g.moves.len()));
        let center = game.field_center();
        let seed = center.offset(engine.cfg().offsets.seed.dx, engine.cfg().offsets.seed.dy);
        assert_eq!(clicks, vec![center, seed]);
        assert!(moves > 2);
        assert_eq!(game.with(|g| g.moves.last().copied()), Some(center));
    }

    #[tokio::test]
    async fn no_field_means_no_planting() {
        let game = FakeGame::new(Page::Main);
        let engine = game.engine();
        assert!(!engine.needs_planting());
    }

    #[tokio::test]
    async fn harvest_moves_to_tool_before_dragging() {
        let game = FakeGame::new(Page::Main);
        game.set_field(90.0, true);
        let engine = game.engine();
        let field = game.ctx.state.detection().field.unwrap();
        assert!(engine.harvest(field.center, &field.boundary).await.unwrap());
        let tool = engine.cfg().offsets.harvest_tool;
        let first_move = game.with(|g| g.moves.first().copied());
        assert_eq!(first_move, Some(field.center.offset(tool.dx, tool.dy)));
        assert_eq!(game.with(|g| g.pointer_downs), 1);
    }

    #[tokio::test]
    async fn drag_is_paced_by_move_duration() {
        let game = FakeGame::new(Page::Main);
        game.set_field(90.0, true);
        let mut config = (*game.ctx.config).clone();
        config.timing.path_move_duration = 0.002;
        let mut ctx = game.ctx.clone();
        ctx.config = Arc::new(config);
        let engine = WorkflowEngine::new(ctx);

        let field = game.ctx.state.detection().field.unwrap();
        let path = engine
            .planner
            .plan(field.center, Some(&field.boundary), PathMode::Harvest);
        let started = Instant::now();
        assert!(engine.harvest(field.center, &field.boundary).await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs_f64(0.002 * path.len() as f64));
    }

    #[tokio::test]
    async fn stop_during_harvest_skips_the_tool_move() {
        let game = FakeGame::new(Page::Main);
        game.set_field(90.0, true);
        game.with(|g| g.halt_after_clicks = Some(1));
        let engine = game.engine();
        let field = game.ctx.state.detection().field.unwrap();
        assert!(!engine.harvest(field.center, &field.boundary).await.unwrap());
        assert!(game.with(|g| g.moves.is_empty()));
        assert_eq!(game.with(|g| g.pointer_downs), 0);
    }
}
