use crate::agent_engine::state::SharedState;
use crate::errors::HayBotResult;
use crate::executor::input::Actuator;

/// Holds the pointer down for the duration of a drag path and marks
/// `path_execution_active`. Dropping the guard on any exit path releases the
/// pointer first and clears the flag second.
pub struct PointerGuard<'a> {
    actuator: &'a dyn Actuator,
    state: &'a SharedState,
}

impl<'a> PointerGuard<'a> {
    pub fn engage(actuator: &'a dyn Actuator, state: &'a SharedState) -> HayBotResult<Self> {
        state.update_bot(|b| b.path_execution_active = true);
        if let Err(e) = actuator.pointer_down() {
            state.update_bot(|b| b.path_execution_active = false);
            return Err(e);
        }
        Ok(Self { actuator, state })
    }
}

impl Drop for PointerGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.actuator.pointer_up() {
            tracing::warn!(error = %e, "pointer release failed");
        }
        self.state.update_bot(|b| b.path_execution_active = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HayBotError;
    use crate::perception::types::Point;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<&'static str>>,
        fail_down: bool,
    }

    impl Actuator for Recorder {
        fn click(&self, _: Point, _: Duration) -> HayBotResult<()> {
            Ok(())
        }
        fn move_to(&self, _: Point, _: Duration) -> HayBotResult<()> {
            self.log.lock().unwrap().push("move");
            Ok(())
        }
        fn pointer_down(&self) -> HayBotResult<()> {
            if self.fail_down {
                return Err(HayBotError::Executor("stuck".into()));
            }
            self.log.lock().unwrap().push("down");
            Ok(())
        }
        fn pointer_up(&self) -> HayBotResult<()> {
            self.log.lock().unwrap().push("up");
            Ok(())
        }
    }

    fn drag(act: &Recorder, state: &SharedState, fail_midway: bool) -> HayBotResult<()> {
        let _guard = PointerGuard::engage(act, state)?;
        assert!(state.bot().path_execution_active);
        act.move_to(Point::new(1, 1), Duration::ZERO)?;
        if fail_midway {
            return Err(HayBotError::Executor("lost focus".into()));
        }
        act.move_to(Point::new(2, 2), Duration::ZERO)?;
        Ok(())
    }

    #[test]
    fn guard_releases_on_early_return() {
        let act = Recorder::default();
        let state = SharedState::new();
        assert!(drag(&act, &state, true).is_err());
        assert_eq!(*act.log.lock().unwrap(), vec!["down", "move", "up"]);
        assert!(!state.bot().path_execution_active);
    }

    #[test]
    fn failed_press_clears_flag_without_release() {
        let act = Recorder {
            fail_down: true,
            ..Default::default()
        };
        let state = SharedState::new();
        assert!(drag(&act, &state, false).is_err());
        assert!(act.log.lock().unwrap().is_empty());
        assert!(!state.bot().path_execution_active);
    }
}
