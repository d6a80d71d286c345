//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("dirs.output", "output")?
        .set_default("dirs.publish", "publish")?
        .set_default("build.queue_latency_ms", 60_000)?
        .set_default("build.wave_mode", "sequential")?
        .set_default("store.path", ".feedbuild/store")
}
