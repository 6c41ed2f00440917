use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::perception::names;
use crate::perception::traits::TemplateSource;
use crate::perception::types::ScreenFrame;

/// Known screen states. "Unknown" is the absence of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    SiloPopup,
    PaperPage,
    Offer,
    Market,
    Main,
    DialogOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub location: Location,
    pub confidence: f32,
}

/// Best observed confidence of every page signal in one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationSignals {
    pub silo: f32,
    pub paper_page: f32,
    pub offer: f32,
    pub market: f32,
    pub main: f32,
    pub close: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationThresholds {
    pub silo: f32,
    pub paper_page: f32,
    pub offer_page: f32,
    pub market_page: f32,
    pub offer_priority: f32,
    pub market_priority: f32,
    pub main: f32,
    pub close: f32,
}

impl LocationThresholds {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            silo: cfg.thresholds.silo_popup,
            paper_page: cfg.thresholds.paper_page,
            offer_page: cfg.thresholds.offer_page,
            market_page: cfg.thresholds.market_page,
            offer_priority: cfg.priority.offer_page,
            market_priority: cfg.priority.market_page,
            main: cfg.thresholds.main_page,
            close: cfg.thresholds.close_button,
        }
    }
}

struct PriorityRule {
    location: Location,
    /// Confidence of the signal when the rule fires.
    fires: fn(&LocationSignals, &LocationThresholds) -> Option<f32>,
}

fn at_least(value: f32, threshold: f32) -> Option<f32> {
    (value >= threshold).then_some(value)
}

/// Evaluated top to bottom; the first rule that fires wins.
const PRIORITY: &[PriorityRule] = &[
    PriorityRule {
        location: Location::SiloPopup,
        fires: |s, t| at_least(s.silo, t.silo),
    },
    PriorityRule {
        location: Location::PaperPage,
        fires: |s, t| at_least(s.paper_page, t.paper_page),
    },
    PriorityRule {
        location: Location::Offer,
        fires: |s, t| at_least(s.offer, t.offer_priority),
    },
    PriorityRule {
        location: Location::Market,
        fires: |s, t| at_least(s.market, t.market_priority).filter(|_| s.offer < t.offer_priority),
    },
    PriorityRule {
        location: Location::Main,
        fires: |s, t| {
            at_least(s.main, t.main).filter(|_| {
                s.offer < t.offer_priority && s.market < t.market_priority && s.paper_page < t.paper_page
            })
        },
    },
    PriorityRule {
        location: Location::DialogOpen,
        fires: |s, t| at_least(s.close, t.close),
    },
];

/// Pure priority resolution over already-measured signals.
pub fn resolve(signals: &LocationSignals, thresholds: &LocationThresholds) -> Option<Classification> {
    PRIORITY.iter().find_map(|rule| {
        (rule.fires)(signals, thresholds).map(|confidence| Classification {
            location: rule.location,
            confidence,
        })
    })
}

/// Resolves the authoritative screen state from template confidences.
#[derive(Debug, Clone)]
pub struct LocationClassifier {
    thresholds: LocationThresholds,
}

impl LocationClassifier {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            thresholds: LocationThresholds::from_config(cfg),
        }
    }

    pub fn thresholds(&self) -> &LocationThresholds {
        &self.thresholds
    }

    pub fn signals(&self, templates: &dyn TemplateSource, frame: &ScreenFrame) -> LocationSignals {
        let t = &self.thresholds;
        let conf = |name: &str, threshold: f32| templates.find_template(frame, name, threshold).confidence;
        LocationSignals {
            main: conf(names::MAIN, t.main),
            offer: conf(names::IN_OFFER, t.offer_page),
            market: conf(names::MARKET, t.market_page),
            paper_page: conf(names::PAPER_PAGE, t.paper_page),
            silo: conf(names::SILO, t.silo),
            close: conf(names::CLOSE, t.close),
        }
    }

    pub fn classify(&self, templates: &dyn TemplateSource, frame: &ScreenFrame) -> Option<Classification> {
        let signals = self.signals(templates, frame);
        let t = &self.thresholds;
        match resolve(&signals, t) {
            Some(c) => {
                tracing::debug!(location = ?c.location, confidence = c.confidence, "location classified");
                Some(c)
            }
            None => {
                tracing::info!(
                    main = signals.main,
                    main_threshold = t.main,
                    market = signals.market,
                    market_threshold = t.market_page,
                    offer = signals.offer,
                    offer_threshold = t.offer_page,
                    paper = signals.paper_page,
                    paper_threshold = t.paper_page,
                    "location uncertain"
                );
                None
            }
        }
    }
}
