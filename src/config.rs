//! Engine configuration, loaded from the environment (spec §6 "Engine
//! Configuration"). Mirrors the teacher's `models::Config::from_env` shape:
//! every key has a typed default and is independently overridable.

use crate::models::Venue;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub bucket_size: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            bucket_size: 20,
            refill_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub refresh_interval: Duration,
    pub hard_refresh_interval: Duration,
    pub stale_after: Duration,
    pub funding_refresh_interval: Duration,

    pub open_threshold: f64,
    pub opportunity_batch_size: usize,
    pub opportunity_batch_pause: Duration,
    pub require_open_interest: bool,

    pub scheduler_tick_interval: Duration,

    pub max_single_leg_retries: u32,
    pub single_leg_backoff: Duration,
    pub single_leg_fill_wait: Duration,
    pub single_leg_poll_interval: Duration,

    pub warning_threshold: f64,
    pub emergency_close_threshold: f64,
    pub liq_check_interval: Duration,
    pub enable_emergency_close: bool,
    pub max_close_retries: u32,

    pub adapter_call_deadline: Duration,

    pub rate_limiter: HashMap<Venue, RateLimiterConfig>,
    pub preferred_venue_for_missing_leg: Vec<Venue>,

    pub symbol_mapping_snapshot_path: Option<std::path::PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut rate_limiter = HashMap::new();
        for venue in Venue::ALL {
            rate_limiter.insert(venue, RateLimiterConfig::default());
        }

        Self {
            refresh_interval: Duration::from_millis(60_000),
            hard_refresh_interval: Duration::from_millis(300_000),
            stale_after: Duration::from_secs(10),
            funding_refresh_interval: Duration::from_secs(300),

            open_threshold: 1e-4,
            opportunity_batch_size: 5,
            opportunity_batch_pause: Duration::from_secs(1),
            require_open_interest: false,

            scheduler_tick_interval: Duration::from_secs(3600),

            max_single_leg_retries: 3,
            single_leg_backoff: Duration::from_millis(60_000),
            single_leg_fill_wait: Duration::from_millis(60_000),
            single_leg_poll_interval: Duration::from_millis(5_000),

            warning_threshold: 0.4,
            emergency_close_threshold: 0.9,
            liq_check_interval: Duration::from_millis(10_000),
            enable_emergency_close: true,
            max_close_retries: 3,

            adapter_call_deadline: Duration::from_secs(30),

            rate_limiter,
            preferred_venue_for_missing_leg: vec![
                Venue::Hyperliquid,
                Venue::Lighter,
                Venue::Aster,
                Venue::Extended,
            ],

            symbol_mapping_snapshot_path: None,
        }
    }
}

impl EngineConfig {
    /// Loads recognized keys from the environment, falling back to the
    /// documented default for anything unset or unparsable (spec §6).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();

        fn env_ms(key: &str) -> Option<Duration> {
            std::env::var(key).ok()?.parse::<u64>().ok().map(Duration::from_millis)
        }
        fn env_f64(key: &str) -> Option<f64> {
            std::env::var(key).ok()?.parse::<f64>().ok()
        }
        fn env_u32(key: &str) -> Option<u32> {
            std::env::var(key).ok()?.parse::<u32>().ok()
        }
        fn env_bool(key: &str) -> Option<bool> {
            std::env::var(key)
                .ok()
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        }

        if let Some(v) = env_ms("REFRESH_INTERVAL_MS") {
            cfg.refresh_interval = v;
        }
        if let Some(v) = env_ms("HARD_REFRESH_INTERVAL_MS") {
            cfg.hard_refresh_interval = v;
        }
        if let Some(v) = env_f64("OPEN_THRESHOLD") {
            cfg.open_threshold = v;
        }
        if let Some(v) = env_u32("MAX_SINGLE_LEG_RETRIES") {
            cfg.max_single_leg_retries = v;
        }
        if let Some(v) = env_ms("SINGLE_LEG_BACKOFF_MS") {
            cfg.single_leg_backoff = v;
        }
        if let Some(v) = env_ms("SINGLE_LEG_FILL_WAIT_MS") {
            cfg.single_leg_fill_wait = v;
        }
        if let Some(v) = env_ms("SINGLE_LEG_POLL_MS") {
            cfg.single_leg_poll_interval = v;
        }
        if let Some(v) = env_f64("WARNING_THRESHOLD") {
            cfg.warning_threshold = v;
        }
        if let Some(v) = env_f64("EMERGENCY_CLOSE_THRESHOLD") {
            cfg.emergency_close_threshold = v;
        }
        if let Some(v) = env_ms("LIQ_CHECK_INTERVAL_MS") {
            cfg.liq_check_interval = v;
        }
        if let Some(v) = env_bool("ENABLE_EMERGENCY_CLOSE") {
            cfg.enable_emergency_close = v;
        }
        if let Some(v) = env_u32("MAX_CLOSE_RETRIES") {
            cfg.max_close_retries = v;
        }
        if let Some(path) = std::env::var("SYMBOL_MAPPING_SNAPSHOT_PATH").ok() {
            cfg.symbol_mapping_snapshot_path = Some(path.into());
        }

        cfg
    }
}
