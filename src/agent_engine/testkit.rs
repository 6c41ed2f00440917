//! Scripted stand-in for the game window used by engine tests.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::RgbImage;

use crate::agent_engine::engine::{EngineContext, WorkflowEngine};
use crate::agent_engine::event_bus::EventBus;
use crate::agent_engine::loop_control::StopSignal;
use crate::agent_engine::state::SharedState;
use crate::config::{AppConfig, TimingConfig};
use crate::errors::{HayBotError, HayBotResult};
use crate::executor::input::Actuator;
use crate::perception::names;
use crate::perception::traits::{ScreenSource, TemplateSource};
use crate::perception::types::{DetectionResult, FieldGeometry, MatchBox, Point, Polygon, ScreenFrame};

const ALL_TEMPLATES: [&str; 25] = [
    names::MAIN,
    names::MARKET,
    names::IN_OFFER,
    names::PAPER_PAGE,
    names::SILO,
    names::CLOSE,
    names::COLLECT,
    names::SOLD,
    names::LOADING,
    names::CLICK,
    names::FIELD,
    names::MARKET_BUTTON,
    names::OFFER,
    names::WHEAT_MARKET,
    names::NEWSPAPER,
    names::NEW_OFFER,
    names::INSERT_BUTTON,
    names::ARROW_ACTIVE,
    names::ARROW_INACTIVE,
    names::PLUS_ACTIVE,
    names::PLUS_INACTIVE,
    names::CHECK_PAPER,
    names::PAPER_COOLDOWN,
    names::PAPER_BUTTON,
    names::PAPER_CREATE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Main,
    Market,
    Offer,
    Paper,
    /// Some dialog with only a close button.
    Dialog,
    /// Nothing recognizable.
    Blank,
}

#[derive(Debug)]
pub struct GameModel {
    pub page: Page,
    pub silo_popup: bool,
    pub collect_pending: u32,
    pub free_slots: u32,
    pub wheat_available: bool,
    pub wheat_selected: bool,
    pub plus_presses_needed: u32,
    pub plus_presses: u32,
    pub arrow_presses_needed: u32,
    pub arrow_presses: u32,
    pub posted: u32,
    pub advert_running: bool,
    pub coverage_after_plant: Option<f32>,
    pub fail_clicks: bool,
    pub fail_moves: bool,
    pub fail_captures: bool,
    /// Clears `running` once this many clicks have landed.
    pub halt_after_clicks: Option<usize>,
    pub clicks: Vec<Point>,
    pub moves: Vec<Point>,
    pub pointer_downs: u32,
    pub captures: u32,
}

impl GameModel {
    fn new(page: Page) -> Self {
        Self {
            page,
            silo_popup: false,
            collect_pending: 0,
            free_slots: 0,
            wheat_available: true,
            wheat_selected: false,
            plus_presses_needed: 0,
            plus_presses: 0,
            arrow_presses_needed: 0,
            arrow_presses: 0,
            posted: 0,
            advert_running: true,
            coverage_after_plant: None,
            fail_clicks: false,
            fail_moves: false,
            fail_captures: false,
            halt_after_clicks: None,
            clicks: Vec::new(),
            moves: Vec::new(),
            pointer_downs: 0,
            captures: 0,
        }
    }

    fn visible(&self, name: &str) -> bool {
        use Page::*;
        let p = self.page;
        match name {
            names::MAIN => p == Main,
            names::MARKET => p == Market,
            names::IN_OFFER => p == Offer,
            names::PAPER_PAGE => p == Paper,
            names::SILO => self.silo_popup,
            names::CLOSE => self.silo_popup || matches!(p, Market | Offer | Paper | Dialog),
            names::COLLECT => self.collect_pending > 0 && matches!(p, Main | Market),
            names::MARKET_BUTTON => p == Main && !self.silo_popup,
            names::NEW_OFFER => p == Market && self.free_slots > 0,
            names::OFFER => p == Market && self.posted > 0,
            names::WHEAT_MARKET => p == Offer && self.wheat_available,
            names::PLUS_ACTIVE => p == Offer && self.plus_presses < self.plus_presses_needed,
            names::PLUS_INACTIVE => p == Offer && self.plus_presses >= self.plus_presses_needed,
            names::ARROW_ACTIVE => p == Offer && self.arrow_presses < self.arrow_presses_needed,
            names::ARROW_INACTIVE => p == Offer && self.arrow_presses >= self.arrow_presses_needed,
            names::INSERT_BUTTON => p == Offer && self.wheat_selected,
            names::CHECK_PAPER => p == Market && self.advert_running,
            names::PAPER_BUTTON | names::PAPER_CREATE => p == Paper && !self.advert_running,
            _ => false,
        }
    }

    fn press(&mut self, name: &str) {
        match name {
            names::CLOSE if self.silo_popup => self.silo_popup = false,
            names::CLOSE => {
                self.page = match self.page {
                    Page::Offer | Page::Paper => Page::Market,
                    Page::Market | Page::Dialog => Page::Main,
                    other => other,
                }
            }
            names::MARKET_BUTTON => self.page = Page::Market,
            names::COLLECT => self.collect_pending = self.collect_pending.saturating_sub(1),
            names::NEW_OFFER => {
                self.page = Page::Offer;
                self.wheat_selected = false;
                self.plus_presses = 0;
                self.arrow_presses = 0;
            }
            names::WHEAT_MARKET => self.wheat_selected = true,
            names::PLUS_ACTIVE => self.plus_presses += 1,
            names::ARROW_ACTIVE => self.arrow_presses += 1,
            names::INSERT_BUTTON => {
                self.posted += 1;
                self.free_slots = self.free_slots.saturating_sub(1);
                self.page = Page::Market;
            }
            names::OFFER => self.page = Page::Paper,
            names::PAPER_CREATE => {
                self.advert_running = true;
                self.page = Page::Market;
            }
            _ => {}
        }
    }
}

/// Fixed on-screen location for a template, far from the test field.
fn anchor(name: &str) -> Option<Point> {
    ALL_TEMPLATES
        .iter()
        .position(|n| *n == name)
        .map(|i| Point::new(1_000 + 20 * i as i32, 1_000))
}

fn name_at(at: Point) -> Option<&'static str> {
    ALL_TEMPLATES.iter().copied().find(|n| anchor(n) == Some(at))
}

struct FakeDevice {
    model: Arc<Mutex<GameModel>>,
    state: SharedState,
}

impl FakeDevice {
    fn model(&self) -> std::sync::MutexGuard<'_, GameModel> {
        self.model.lock().unwrap()
    }
}

#[async_trait]
impl ScreenSource for FakeDevice {
    async fn capture(&self, _use_cache: bool) -> HayBotResult<ScreenFrame> {
        let mut model = self.model();
        model.captures += 1;
        if model.fail_captures {
            return Err(HayBotError::Perception("injected capture failure".into()));
        }
        Ok(ScreenFrame::new(RgbImage::new(4, 4)))
    }

    fn invalidate(&self) {}
}

impl TemplateSource for FakeDevice {
    fn find_template(&self, _frame: &ScreenFrame, name: &str, threshold: f32) -> DetectionResult {
        let confidence = if self.model().visible(name) { 0.95 } else { 0.0 };
        DetectionResult {
            location: if confidence >= threshold { anchor(name) } else { None },
            confidence,
        }
    }

    fn find_all(&self, _frame: &ScreenFrame, _name: &str, _threshold: f32) -> Vec<MatchBox> {
        Vec::new()
    }
}

impl Actuator for FakeDevice {
    fn click(&self, at: Point, _hold: std::time::Duration) -> HayBotResult<()> {
        let mut model = self.model();
        if model.fail_clicks {
            return Err(HayBotError::Executor("injected click failure".into()));
        }
        model.clicks.push(at);
        if let Some(name) = name_at(at) {
            model.press(name);
        }
        if model.halt_after_clicks.is_some_and(|n| model.clicks.len() >= n) {
            self.state.update_bot(|b| b.running = false);
        }
        Ok(())
    }

    fn move_to(&self, at: Point, _duration: std::time::Duration) -> HayBotResult<()> {
        let mut model = self.model();
        if model.fail_moves {
            return Err(HayBotError::Executor("injected move failure".into()));
        }
        model.moves.push(at);
        Ok(())
    }

    fn pointer_down(&self) -> HayBotResult<()> {
        self.model().pointer_downs += 1;
        Ok(())
    }

    fn pointer_up(&self) -> HayBotResult<()> {
        if let Some(coverage) = self.model().coverage_after_plant {
            self.state.update_detection(|d| {
                d.coverage = coverage;
                d.ready_for_harvest = false;
            });
        }
        Ok(())
    }
}

/// All timings zeroed so scenarios run instantly.
pub fn instant_config() -> AppConfig {
    let mut timing = toml::Value::try_from(TimingConfig::default()).unwrap();
    for (_, value) in timing.as_table_mut().unwrap().iter_mut() {
        *value = toml::Value::Float(0.0);
    }
    let mut cfg = AppConfig::default();
    cfg.timing = timing.try_into().unwrap();
    cfg.timing.stop_check_interval = 0.001;
    cfg.timing.max_sleep_chunk = 0.001;
    cfg
}

pub struct FakeGame {
    model: Arc<Mutex<GameModel>>,
    pub ctx: EngineContext,
}

impl FakeGame {
    pub fn new(page: Page) -> Self {
        let model = Arc::new(Mutex::new(GameModel::new(page)));
        let state = SharedState::new();
        state.update_bot(|b| b.running = true);
        let device = Arc::new(FakeDevice {
            model: Arc::clone(&model),
            state: state.clone(),
        });
        let config = Arc::new(instant_config());
        let ctx = EngineContext {
            stop: StopSignal::from_timing(&config.timing),
            config,
            screen: device.clone(),
            templates: device.clone(),
            actuator: device,
            state,
            events: EventBus::default(),
        };
        Self { model, ctx }
    }

    pub fn engine(&self) -> WorkflowEngine {
        WorkflowEngine::new(self.ctx.clone())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut GameModel) -> R) -> R {
        f(&mut self.model.lock().unwrap())
    }

    pub fn field_center(&self) -> Point {
        Point::new(200, 200)
    }

    pub fn set_field(&self, coverage: f32, ready: bool) {
        let center = self.field_center();
        self.ctx.state.update_detection(|d| {
            d.field = Some(FieldGeometry {
                center,
                boundary: Polygon::rect(100, 100, 200, 200),
            });
            d.coverage = coverage;
            d.ready_for_harvest = ready;
        });
    }

    pub fn clicked(&self, name: &str) -> bool {
        match anchor(name) {
            Some(at) => self.with(|g| g.clicks.contains(&at)),
            None => false,
        }
    }
}
