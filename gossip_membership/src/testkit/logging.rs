use tracing::Level;

pub const LOG_LEVEL: Level = Level::WARN;

/// Installs a fmt subscriber at `level`. Later calls, from other tests for instance, are
/// ignored.
pub fn init_logging(level: Level) {
  let _ = tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(false)
    .try_init();
}
