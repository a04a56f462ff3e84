//! Logging initialization for heightmap diagnostics
//!
//! Build summaries (column counts, elapsed time, driver choice) log at
//! `info` under `reliefmap::heightmap`; the compression regulator reports
//! compressed and skipped blocks at `debug` under `reliefmap::block`. The
//! default filter keeps build progress visible while silencing regulator
//! chatter, which fires on every worker tick. Override with `RUST_LOG`, e.g.
//! `RUST_LOG=reliefmap::block=debug` when diagnosing memory pressure.

/// Default filter: build diagnostics on, per-tick regulator output off.
const DEFAULT_FILTER: &str = "info,reliefmap::block=warn";

/// Initialize the logging system with the crate's default filter.
///
/// # Example
/// ```
/// reliefmap::core::logging::init();
/// log::info!("building heightmap");
/// ```
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_FILTER))
        .format_timestamp_millis()
        .init();
}

/// Initialize for tests: capture output per test and tolerate repeated
/// initialization across the test binary.
pub fn init_for_tests() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(DEFAULT_FILTER),
    )
    .is_test(true)
    .try_init();
}
