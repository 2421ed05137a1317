use std::path::PathBuf;

use tracing::level_filters::LevelFilter;

const API_KEY: &str = "API_KEY";

pub fn get_api_key() -> Option<String> {
    non_empty_var(API_KEY)
}

const CONFIG_URL: &str = "CONFIG_URL";

pub fn get_config_url() -> Option<String> {
    non_empty_var(CONFIG_URL).map(|url| url.trim_end_matches('/').to_string())
}

const GEO_API_KEY: &str = "GEO_API_KEY";

pub fn get_geo_api_key() -> Option<String> {
    non_empty_var(GEO_API_KEY)
}

const GEO_API_URL: &str = "GEO_API_URL";

const DEFAULT_GEO_API_URL: &str = "https://ipinfo.io";

pub fn get_default_geo_api_url() -> String {
    DEFAULT_GEO_API_URL.to_string()
}

pub fn get_geo_api_url() -> String {
    non_empty_var(GEO_API_URL)
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(get_default_geo_api_url)
}

const AGENT_LOG_LEVEL: &str = "AGENT_LOG_LEVEL";

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

pub fn get_log_level() -> LevelFilter {
    let level_from_env = std::env::var(AGENT_LOG_LEVEL);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}

const AGENT_ERROR_LOG: &str = "AGENT_ERROR_LOG";

pub fn get_error_log() -> Option<PathBuf> {
    non_empty_var(AGENT_ERROR_LOG).map(PathBuf::from)
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
