use crate::config::Config;
use crate::domain::market::timeframe::Timeframe;
use rust_decimal_macros::dec;
use std::env;
use std::sync::Mutex;
use std::sync::OnceLock;

// Global lock to prevent race conditions when modifying environment variables in tests
static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn get_env_lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

const KEYS: &[&str] = &[
    "PIVOT_LEFT_BARS",
    "PIVOT_RIGHT_BARS",
    "TIMEFRAMES",
    "BASE_TIMEFRAME",
    "SESSION_OPEN",
    "SESSION_CLOSE",
    "DOUBLE_TOLERANCE_PCT",
    "DOUBLE_MAX_WINDOW_MINUTES",
    "VCP_MIN_CONTRACTIONS",
    "PIPELINE_QUEUE_CAPACITY",
];

fn clear_env() {
    for key in KEYS {
        unsafe { env::remove_var(key) };
    }
}

#[test]
fn test_config_defaults() {
    let _guard = get_env_lock().lock().unwrap();
    clear_env();

    let config = Config::from_env().unwrap();
    assert_eq!(config.detection.pivot.left_bars, 2);
    assert_eq!(config.detection.pivot.right_bars, 2);
    assert_eq!(config.aggregation.timeframes, vec![Timeframe::ONE_MIN]);
    assert!(config.aggregation.session.is_none());
    assert_eq!(config.pipeline.queue_capacity, 1024);
}

#[test]
fn test_config_from_env_values() {
    let _guard = get_env_lock().lock().unwrap();
    clear_env();

    unsafe {
        env::set_var("PIVOT_LEFT_BARS", "3");
        env::set_var("PIVOT_RIGHT_BARS", "1");
        env::set_var("TIMEFRAMES", "5m,15m,75m");
        env::set_var("SESSION_OPEN", "09:15");
        env::set_var("SESSION_CLOSE", "15:30");
        env::set_var("DOUBLE_TOLERANCE_PCT", "0.02");
        env::set_var("DOUBLE_MAX_WINDOW_MINUTES", "90");
        env::set_var("VCP_MIN_CONTRACTIONS", "4");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.detection.pivot.left_bars, 3);
    assert_eq!(config.detection.pivot.right_bars, 1);
    assert_eq!(config.aggregation.timeframes.len(), 3);
    assert_eq!(config.aggregation.timeframes[2].to_minutes(), 75);
    assert!(config.aggregation.session.is_some());
    assert_eq!(config.detection.double_pattern.tolerance_pct, dec!(0.02));
    assert_eq!(config.detection.double_pattern.max_window_ms, 90 * 60_000);
    assert_eq!(config.detection.vcp.min_contractions, 4);

    clear_env();
}

#[test]
fn test_config_rejects_invalid_values() {
    let _guard = get_env_lock().lock().unwrap();
    clear_env();

    unsafe { env::set_var("PIVOT_LEFT_BARS", "0") };
    assert!(Config::from_env().is_err());
    clear_env();

    unsafe { env::set_var("SESSION_OPEN", "09:15") };
    assert!(Config::from_env().is_err());
    clear_env();

    unsafe { env::set_var("TIMEFRAMES", "5m,banana") };
    assert!(Config::from_env().is_err());
    clear_env();
}
