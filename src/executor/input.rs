// Physical pointer simulation.
use std::time::Duration;

use crate::errors::HayBotResult;
use crate::perception::types::Point;

/// Pointer injection. Calls are synchronous so that a guard's `Drop` can
/// release the pointer; pacing between calls is done by the caller.
pub trait Actuator: Send + Sync {
    /// Moves to `at` and clicks. `hold` is a hint for how long the motion
    /// may take.
    fn click(&self, at: Point, hold: Duration) -> HayBotResult<()>;

    /// Moves to `at`. `duration` is the time the caller budgets for this
    /// move. Backends may jump instantly; the engine waits out the budget
    /// after each move, so drag pacing does not depend on the backend.
    fn move_to(&self, at: Point, duration: Duration) -> HayBotResult<()>;

    fn pointer_down(&self) -> HayBotResult<()>;

    fn pointer_up(&self) -> HayBotResult<()>;
}

#[cfg(feature = "native")]
pub use native::EnigoActuator;

#[cfg(feature = "native")]
mod native {
    use std::sync::Mutex;
    use std::time::Duration;

    use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};

    use super::Actuator;
    use crate::errors::{HayBotError, HayBotResult};
    use crate::perception::types::Point;

    pub struct EnigoActuator {
        enigo: Mutex<Enigo>,
    }

    impl EnigoActuator {
        pub fn new() -> HayBotResult<Self> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| HayBotError::Executor(format!("input backend init failed: {e:?}")))?;
            Ok(Self {
                enigo: Mutex::new(enigo),
            })
        }

        fn with<T>(&self, f: impl FnOnce(&mut Enigo) -> Result<T, enigo::InputError>) -> HayBotResult<T> {
            let mut enigo = self
                .enigo
                .lock()
                .map_err(|_| HayBotError::Executor("input backend lock poisoned".into()))?;
            f(&mut enigo).map_err(|e| HayBotError::Executor(format!("{e:?}")))
        }
    }

    impl Actuator for EnigoActuator {
        fn click(&self, at: Point, _hold: Duration) -> HayBotResult<()> {
            self.with(|e| {
                e.move_mouse(at.x, at.y, Coordinate::Abs)?;
                e.button(Button::Left, Direction::Click)
            })
        }

        // Jumps straight to `at`; the caller paces the drag.
        fn move_to(&self, at: Point, _duration: Duration) -> HayBotResult<()> {
            self.with(|e| e.move_mouse(at.x, at.y, Coordinate::Abs))
        }

        fn pointer_down(&self) -> HayBotResult<()> {
            self.with(|e| e.button(Button::Left, Direction::Press))
        }

        fn pointer_up(&self) -> HayBotResult<()> {
            self.with(|e| e.button(Button::Left, Direction::Release))
        }
    }
}
