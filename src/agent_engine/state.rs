use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::perception::types::{FieldGeometry, FieldObservation, ScreenFrame};

/// Steps of one workflow cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    AcquireScreen,
    HandleBlockingPopups,
    CheckPersistentSiloFull,
    EnsureMainPage,
    EvaluatePlanting,
    EvaluateHarvest,
    CheckMarketTrigger,
    Idle,
}

/// Flags that survive across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PersistentBotState {
    pub running: bool,
    /// Set by a silo popup; cleared only after a market deposit succeeded.
    pub silo_full: bool,
    pub wheat_sold_this_session: bool,
    /// True only while a drag path is being actuated.
    pub path_execution_active: bool,
}

/// Latest outputs of the detection task.
#[derive(Debug, Clone, Default)]
pub struct DetectionState {
    pub frame: Option<ScreenFrame>,
    pub field: Option<FieldGeometry>,
    pub coverage: f32,
    pub ready_for_harvest: bool,
    pub silo_popup: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    detection: DetectionState,
    bot: PersistentBotState,
}

/// The single lock shared by the detection and workflow tasks. Every method
/// is a short copy-in/copy-out critical section.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<Inner>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn detection(&self) -> DetectionState {
        self.lock().detection.clone()
    }

    pub fn bot(&self) -> PersistentBotState {
        self.lock().bot
    }

    pub fn update_bot<R>(&self, f: impl FnOnce(&mut PersistentBotState) -> R) -> R {
        f(&mut self.lock().bot)
    }

    pub fn update_detection<R>(&self, f: impl FnOnce(&mut DetectionState) -> R) -> R {
        f(&mut self.lock().detection)
    }

    /// Stores a frame without touching the field geometry.
    pub fn refresh_frame(&self, frame: ScreenFrame) {
        self.lock().detection.frame = Some(frame);
    }

    /// Publishes a detection result. While a path is executing only the
    /// frame is refreshed; returns whether the geometry was written.
    pub fn publish(&self, frame: ScreenFrame, obs: FieldObservation) -> bool {
        let mut inner = self.lock();
        let captured_at = frame.captured_at;
        inner.detection.frame = Some(frame);
        if inner.bot.path_execution_active {
            return false;
        }
        let d = &mut inner.detection;
        d.field = obs.field;
        d.coverage = obs.coverage;
        d.ready_for_harvest = obs.ready_for_harvest;
        d.silo_popup = obs.silo_popup;
        d.updated_at = Some(captured_at);
        true
    }
}
