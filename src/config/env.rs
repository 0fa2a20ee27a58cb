use std::env;

use super::{ClientConfig, DEFAULT_ENDPOINT};

pub const ENV_WS_URL: &str = "LIVE_WS_URL";
pub const ENV_USER_ID: &str = "LIVE_USER_ID";
pub const ENV_RUN_ID: &str = "LIVE_RUN_ID";

/// Read a variable, treating empty values as unset.
fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Build the configuration from environment variables and defaults.
///
/// `.env` values are expected to have been loaded into the environment by
/// the caller (see `main.rs`).
pub fn load_from_env() -> ClientConfig {
    ClientConfig {
        endpoint: non_empty(ENV_WS_URL).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        user_id: non_empty(ENV_USER_ID),
        run_id: non_empty(ENV_RUN_ID),
    }
}
