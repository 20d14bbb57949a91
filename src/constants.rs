// Server configuration
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: &str = "3000";
pub const DEFAULT_DATA_PATH: &str = "data";
pub const DEFAULT_LOG_FILTER: &str = "personal_finance=info,tower_http=info";

// Session configuration
pub const SESSION_NAME: &str = "finance_session";
pub const SESSION_EXPIRY_DAYS: i64 = 3;
pub const MIN_SESSION_SECRET_LENGTH: usize = 64;

// Realtime
pub const DEFAULT_REALTIME_CAPACITY: usize = 1024;

// Dollar price
pub const DEFAULT_PRICE_URL: &str = "https://pydolarve.org/api/v1/dollar?page=bcv";
pub const FALLBACK_DOLLAR_PRICE: f64 = 36.6;
pub const PRICE_REQUEST_TIMEOUT_SECS: u64 = 10;

// Sync layer
pub const DEFAULT_STALE_SECS: u64 = 5 * 60;
pub const TEMP_ID_PREFIX: &str = "temp-";

// Database limits and defaults
pub const DEFAULT_TRANSACTIONS_LIMIT: u32 = 500;
pub const MAX_LIMIT: u32 = 1000;
pub const MAX_OFFSET: u32 = 1_000_000;
pub const RECENT_TRANSACTIONS_COUNT: usize = 10;
pub const MONEY_MOVEMENT_DAYS: u32 = 7;

// Validation limits
pub const MAX_CATEGORY_NAME_LENGTH: usize = 100;
pub const MAX_DESCRIPTION_LENGTH: usize = 255;
pub const MAX_COLOR_LENGTH: usize = 32;
pub const MAX_ICON_LENGTH: usize = 64;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_USERNAME_LENGTH: usize = 4;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_AMOUNT: f64 = 1_000_000_000_000.0;

// Category defaults
pub const DEFAULT_CATEGORY_COLOR: &str = "#6b7280";
pub const DEFAULT_CATEGORY_ICON: &str = "circle";

// Error messages
pub const ERR_DATABASE_ACCESS: &str = "Database access error";
pub const ERR_DATABASE_OPERATION: &str = "Database operation failed";
pub const ERR_INVALID_SESSION: &str = "Invalid session";
pub const ERR_UNAUTHORIZED: &str = "Not logged in";
pub const ERR_NO_UPDATE_FIELDS: &str = "At least one field must be provided for update";
