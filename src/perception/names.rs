//! Template catalogue keys, as used in `[templates.files]`.

pub const MAIN: &str = "main";
pub const MARKET: &str = "market";
pub const IN_OFFER: &str = "in_offer";
pub const PAPER_PAGE: &str = "paper_page";
pub const SILO: &str = "silo";
pub const CLOSE: &str = "close";
pub const COLLECT: &str = "collect";
pub const SOLD: &str = "sold";
pub const LOADING: &str = "loading";
pub const CLICK: &str = "click";
pub const FIELD: &str = "field";
pub const MARKET_BUTTON: &str = "market_button";
pub const OFFER: &str = "offer";
pub const WHEAT_MARKET: &str = "wheat_market";
pub const NEWSPAPER: &str = "newspaper";
pub const NEW_OFFER: &str = "new_offer";
pub const INSERT_BUTTON: &str = "insert_button";
pub const ARROW_ACTIVE: &str = "arrow_right_active";
pub const ARROW_INACTIVE: &str = "arrow_right_deactive";
pub const PLUS_ACTIVE: &str = "plus_button_active";
pub const PLUS_INACTIVE: &str = "plus_button_deactive";
pub const CHECK_PAPER: &str = "check_paper";
pub const PAPER_COOLDOWN: &str = "paper_cooldown";
pub const PAPER_BUTTON: &str = "paper_button";
pub const PAPER_CREATE: &str = "paper_create";
