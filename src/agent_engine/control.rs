use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::agent_engine::engine::{EngineContext, WorkflowEngine};
use crate::errors::{HayBotError, HayBotResult};

/// Start/stop surface for the workflow task.
pub struct EngineController {
    ctx: EngineContext,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineController {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            task: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.ctx.state.bot().running
    }

    /// Spawns the workflow loop. `Ok(false)` while a previous loop task is
    /// still alive, even if it was asked to stop; an error if no field has
    /// been detected yet.
    pub fn start(&self) -> HayBotResult<bool> {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            if self.is_running() {
                tracing::info!("start requested but engine already running");
            } else {
                tracing::info!("start requested while the previous loop is still winding down");
            }
            return Ok(false);
        }
        if self.ctx.state.detection().field.is_none() {
            tracing::warn!("start refused: no field detected");
            return Err(HayBotError::Agent("no field detected; cannot start".into()));
        }

        self.ctx.stop.reset();
        self.ctx.state.update_bot(|b| b.running = true);
        let mut engine = WorkflowEngine::new(self.ctx.clone());
        *task = Some(tokio::spawn(async move {
            engine.run_loop().await;
            tracing::info!("workflow task exited");
        }));
        tracing::info!("engine started");
        Ok(true)
    }

    /// Signals the loop to stop. Idempotent.
    pub fn stop(&self) {
        if !self.is_running() && self.ctx.stop.is_stopped() {
            return;
        }
        self.ctx.stop.stop();
        self.ctx.state.update_bot(|b| b.running = false);
        tracing::info!("engine stop requested");
    }

    /// Stops and waits for the workflow task to finish.
    pub async fn shutdown(&self) -> HayBotResult<()> {
        self.stop();
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::testkit::{FakeGame, Page};

    #[tokio::test]
    async fn start_is_refused_without_a_field() {
        let game = FakeGame::new(Page::Main);
        game.ctx.state.update_bot(|b| b.running = false);
        let controller = EngineController::new(game.ctx.clone());
        assert!(matches!(controller.start(), Err(HayBotError::Agent(_))));
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let game = FakeGame::new(Page::Main);
        game.ctx.state.update_bot(|b| b.running = false);
        game.set_field(90.0, false);
        let controller = EngineController::new(game.ctx.clone());

        assert!(controller.start().unwrap());
        assert!(!controller.start().unwrap());
        controller.stop();
        controller.stop();
        controller.shutdown().await.unwrap();
        assert!(!controller.is_running());
        assert!(game.ctx.stop.is_stopped());
    }

    #[tokio::test]
    async fn stop_then_start_waits_for_previous_loop() {
        let game = FakeGame::new(Page::Main);
        game.ctx.state.update_bot(|b| b.running = false);
        game.set_field(90.0, false);
        let controller = EngineController::new(game.ctx.clone());

        assert!(controller.start().unwrap());
        controller.stop();
        // The stopped loop has not exited yet, so no second loop may start.
        assert!(!controller.start().unwrap());
        assert!(game.ctx.stop.is_stopped());

        controller.shutdown().await.unwrap();
        assert!(controller.start().unwrap());
        assert!(controller.is_running());
        controller.shutdown().await.unwrap();
        assert!(!controller.is_running());
    }
}
