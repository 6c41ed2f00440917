use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{HayBotError, HayBotResult};

/// Every knob the bot reads. All sections default to the tuned values, so a
/// partial `config.toml` only needs to name what it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub offsets: OffsetsConfig,
    #[serde(default)]
    pub retries: RetriesConfig,
    #[serde(default)]
    pub field: FieldConfig,
    #[serde(default)]
    pub path: PathConfig,
    #[serde(default)]
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Used when no resolution profile matches or its directory is missing.
    pub default_dir: PathBuf,
    pub profiles: Vec<ResolutionProfile>,
    /// Template name → file name inside the selected directory.
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionProfile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub dir: PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        let files = [
            ("main", "main.png"),
            ("market", "in_market.png"),
            ("in_offer", "in_offer.png"),
            ("paper_page", "paper_page.png"),
            ("silo", "silo.png"),
            ("close", "close.png"),
            ("collect", "collect.png"),
            ("sold", "sold.png"),
            ("loading", "loading.png"),
            ("click", "click.png"),
            ("field", "field.png"),
            ("market_button", "market.png"),
            ("offer", "offer.png"),
            ("wheat_market", "wheat_market.png"),
            ("newspaper", "newspaper.png"),
            ("new_offer", "new_offer.png"),
            ("insert_button", "insert_button.png"),
            ("arrow_right_active", "arrow_right_active.png"),
            ("arrow_right_deactive", "arrow_right_deactive.png"),
            ("plus_button_active", "plus_button_active.png"),
            ("plus_button_deactive", "plus_button_deactive.png"),
            ("check_paper", "check_paper.png"),
            ("paper_cooldown", "paper_cooldown.png"),
            ("paper_button", "paper_button.png"),
            ("paper_create", "paper_create.png"),
        ]
        .into_iter()
        .map(|(name, file)| (name.to_string(), file.to_string()))
        .collect();

        Self {
            default_dir: PathBuf::from("templates"),
            profiles: vec![
                ResolutionProfile {
                    name: "1k".into(),
                    width: 1920,
                    height: 1080,
                    dir: PathBuf::from("templates/1ktemplates"),
                },
                ResolutionProfile {
                    name: "2k".into(),
                    width: 2560,
                    height: 1440,
                    dir: PathBuf::from("templates/2ktemplates"),
                },
            ],
            files,
        }
    }
}

/// Per-template confidence thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub main_page: f32,
    pub market_page: f32,
    pub offer_page: f32,
    pub paper_page: f32,
    pub silo_popup: f32,
    /// Silo check run by the background detection task.
    pub silo_watch: f32,
    pub close_button: f32,
    pub market_button: f32,
    pub wheat_market: f32,
    pub loading_screen: f32,
    pub click_escape: f32,
    pub collect_button: f32,
    pub sold_items: f32,
    pub newspaper: f32,
    pub new_offer: f32,
    pub insert_button: f32,
    pub plus_active: f32,
    pub plus_inactive: f32,
    pub arrow_active: f32,
    pub arrow_inactive: f32,
    /// Floor used to break ties when neither button state clears its threshold.
    pub ambiguous_button: f32,
    pub paper_button: f32,
    pub paper_create: f32,
    pub paper_cooldown: f32,
    pub check_paper: f32,
    pub advert_offer: f32,
    pub advert_wheat_offer: f32,
    pub advert_new_offer: f32,
    pub field_tile: f32,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            main_page: 0.7,
            market_page: 0.7,
            offer_page: 0.5,
            paper_page: 0.7,
            silo_popup: 0.7,
            silo_watch: 0.6,
            close_button: 0.4,
            market_button: 0.7,
            wheat_market: 0.8,
            loading_screen: 0.7,
            click_escape: 0.8,
            collect_button: 0.7,
            sold_items: 0.7,
            newspaper: 0.6,
            new_offer: 0.7,
            insert_button: 0.7,
            plus_active: 0.7,
            plus_inactive: 0.7,
            arrow_active: 0.7,
            arrow_inactive: 0.7,
            ambiguous_button: 0.6,
            paper_button: 0.7,
            paper_create: 0.7,
            paper_cooldown: 0.8,
            check_paper: 0.6,
            advert_offer: 0.7,
            advert_wheat_offer: 0.7,
            advert_new_offer: 0.7,
            field_tile: 0.5,
        }
    }
}

/// Thresholds that decide precedence between overlapping page detections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub offer_page: f32,
    pub market_page: f32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            offer_page: 0.8,
            market_page: 0.7,
        }
    }
}

/// Delays in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub click_delay: f64,
    pub move_duration: f64,
    pub path_move_duration: f64,
    pub drag_start_duration: f64,
    pub screen_center_delay: f64,
    pub seed_select_wait: f64,
    pub initial_drag_wait: f64,
    pub cycle_pause: f64,
    pub post_capture_pause: f64,
    pub detection_interval: f64,
    pub detection_error_backoff: f64,
    pub stop_check_interval: f64,
    pub max_sleep_chunk: f64,
    pub growth_time: f64,
    pub market_check_interval: f64,
    pub growth_poll_interval: f64,
    pub market_ui_wait: f64,
    pub market_step_delay: f64,
    pub market_button_wait: f64,
    pub market_load_poll: f64,
    pub retry_delay: f64,
    pub short_retry_delay: f64,
    pub recovery_pause: f64,
    pub unknown_location_wait: f64,
    pub ensure_main_retry_pause: f64,
    pub ensure_main_settle: f64,
    pub popup_close_delay: f64,
    pub silo_close_wait: f64,
    pub loading_escape_wait: f64,
    pub loading_wait: f64,
    pub loading_settle: f64,
    pub planting_settle: f64,
    pub planting_retry_pause: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            click_delay: 0.2,
            move_duration: 0.05,
            path_move_duration: 0.02,
            drag_start_duration: 0.5,
            screen_center_delay: 2.0,
            seed_select_wait: 0.8,
            initial_drag_wait: 0.2,
            cycle_pause: 3.0,
            post_capture_pause: 1.0,
            detection_interval: 0.3,
            detection_error_backoff: 1.0,
            stop_check_interval: 0.1,
            max_sleep_chunk: 1.0,
            growth_time: 110.0,
            market_check_interval: 12.0,
            growth_poll_interval: 5.0,
            market_ui_wait: 0.4,
            market_step_delay: 0.1,
            market_button_wait: 0.2,
            market_load_poll: 0.5,
            retry_delay: 10.0,
            short_retry_delay: 5.0,
            recovery_pause: 0.5,
            unknown_location_wait: 1.0,
            ensure_main_retry_pause: 2.0,
            ensure_main_settle: 1.0,
            popup_close_delay: 0.8,
            silo_close_wait: 1.0,
            loading_escape_wait: 1.5,
            loading_wait: 2.0,
            loading_settle: 0.5,
            planting_settle: 2.0,
            planting_retry_pause: 1.0,
        }
    }
}

/// Converts a seconds knob into a `Duration`, treating negatives as zero.
pub fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

/// UI sub-element positions relative to the detected field center.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetsConfig {
    pub seed: Offset,
    pub harvest_tool: Offset,
    pub initial_plant: Offset,
    pub initial_harvest: Offset,
}

impl Default for OffsetsConfig {
    fn default() -> Self {
        Self {
            seed: Offset { dx: -100, dy: -150 },
            harvest_tool: Offset { dx: -260, dy: -40 },
            initial_plant: Offset { dx: 25, dy: 80 },
            initial_harvest: Offset { dx: 15, dy: 25 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetriesConfig {
    pub ensure_main: u32,
    pub return_to_main: u32,
    pub planting: u32,
    pub collect_rounds: u32,
    pub market_slots: u32,
    pub button_polls: u32,
    pub market_load: u32,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            ensure_main: 5,
            return_to_main: 10,
            planting: 5,
            collect_rounds: 10,
            market_slots: 10,
            button_polls: 20,
            market_load: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Planting is needed while coverage stays below this percentage.
    pub plant_below_coverage: f32,
    /// Harvest requires coverage strictly above this percentage.
    pub harvest_min_coverage: f32,
    /// Coverage at which the field is classified ready for harvest.
    pub ready_coverage: f32,
    /// Coverage gain per planting attempt that counts as good progress.
    pub planting_progress_delta: f32,
    /// Connected crop components smaller than this (pixels) are noise.
    pub min_component_area: u32,
    pub min_field_area: f64,
    /// Regions larger than this fraction of the frame are rejected.
    pub max_field_fraction: f64,
    /// HSV band, OpenCV scaling: H in [0,180), S and V in [0,255].
    pub hsv_lower: [u8; 3],
    pub hsv_upper: [u8; 3],
    pub morph_kernel: u32,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            plant_below_coverage: 80.0,
            harvest_min_coverage: 30.0,
            ready_coverage: 20.0,
            planting_progress_delta: 10.0,
            min_component_area: 2000,
            min_field_area: 1000.0,
            max_field_fraction: 0.5,
            hsv_lower: [15, 100, 150],
            hsv_upper: [35, 255, 255],
            morph_kernel: 5,
        }
    }
}

/// Scan-line spacing for one coverage mode, in pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathSpacing {
    pub line_spacing: i32,
    pub line_step: i32,
    pub vertical_spacing: i32,
    pub vertical_step: i32,
    pub sample_step: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub plant: PathSpacing,
    pub harvest: PathSpacing,
    /// Log drag progress every N path points; 0 disables it.
    pub progress_log_interval: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            plant: PathSpacing {
                line_spacing: 45,
                line_step: 40,
                vertical_spacing: 90,
                vertical_step: 50,
                sample_step: 10,
            },
            harvest: PathSpacing {
                line_spacing: 55,
                line_step: 50,
                vertical_spacing: 165,
                vertical_step: 60,
                sample_step: 10,
            },
            progress_log_interval: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Visit the market periodically while crops grow instead of idling.
    pub manage_during_growth: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            manage_during_growth: true,
        }
    }
}

fn resolve_config_path() -> HayBotResult<PathBuf> {
    if let Ok(explicit) = std::env::var("HAYBOT_CONFIG") {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config from HAYBOT_CONFIG");
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "HAYBOT_CONFIG points to a missing file");
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("haybot").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(HayBotError::Config(
        "config.toml not found (HAYBOT_CONFIG, executable dir, working dir, user config dir)".into(),
    ))
}

pub fn parse_config(content: &str) -> HayBotResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.timing.stop_check_interval <= 0.0 || config.timing.max_sleep_chunk <= 0.0 {
        return Err(HayBotError::Config(
            "timing.stop_check_interval and timing.max_sleep_chunk must be positive".into(),
        ));
    }
    Ok(config)
}

pub fn load_config_from(path: &Path) -> HayBotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), templates = config.templates.files.len(), "config loaded");
    Ok(config)
}

/// Where a fresh config is written when none exists yet.
pub fn default_config_path() -> HayBotResult<PathBuf> {
    match dirs::config_dir() {
        Some(dir) => Ok(dir.join("haybot").join("config.toml")),
        None => Ok(std::env::current_dir()?.join("config.toml")),
    }
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> HayBotResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

/// Loads the resolved config. With no config anywhere, writes the defaults
/// to [`default_config_path`] so they can be edited, and returns them.
pub fn load_or_init_config() -> HayBotResult<AppConfig> {
    match resolve_config_path() {
        Ok(path) => load_config_from(&path),
        Err(e) => {
            tracing::warn!(error = %e, "no config found; using defaults");
            let config = AppConfig::default();
            if let Err(e) = default_config_path().and_then(|path| save_config_to(&config, &path)) {
                tracing::warn!(error = %e, "could not write default config");
            }
            Ok(config)
        }
    }
}
