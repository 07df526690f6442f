use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_ENV: &str = "QUARRY_LOG";

const NOISY_TARGETS: &[(&str, &str)] = &[("mysql_async", "warn"), ("rustls", "warn")];

/// `QUARRY_LOG` wins over the configured filter; noisy dependencies are
/// capped unless the directives name them.
pub fn build_env_filter(env_value: Option<&str>, configured: &str) -> Result<EnvFilter, String> {
    let base = env_value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(configured);

    let mut directives = vec![base.to_string()];
    for (target, level) in NOISY_TARGETS {
        if !base.contains(target) {
            directives.push(format!("{target}={level}"));
        }
    }

    let filter = directives.join(",");
    EnvFilter::try_new(&filter).map_err(|error| format!("invalid log filter `{filter}`: {error}"))
}

/// Logs go to stderr so stdout stays clean JSON.
pub fn init_logging(configured: &str) -> Result<(), String> {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = build_env_filter(env_value.as_deref(), configured)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(filter),
        )
        .try_init()
        .map_err(|error| format!("failed to install log subscriber: {error}"))
}
