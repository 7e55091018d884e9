use env_logger::Builder;

/// Filter used when neither `--log-level` nor `ROADS_LOG_LEVEL` is set.
pub const DEFAULT_LEVEL: &str = "info";

// The level comes from config alone; RUST_LOG is not consulted.
fn builder(level: Option<&str>) -> Builder {
    let mut b = Builder::new();
    b.parse_filters(level.unwrap_or(DEFAULT_LEVEL)).format_timestamp_millis();
    b
}

/// Initialises env_logger once with the configured level.
pub fn init(level: Option<&str>) {
    let _ = builder(level).try_init();
}
