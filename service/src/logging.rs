//! Terminal logging with per-target level overrides.
//!
//! `LOG_LEVEL_FILTER` sets the level for everything; `LOG_TARGETS` raises or
//! lowers individual targets, e.g. `stream=debug,auth=warn` to follow the
//! consumer loop while keeping handshake rejections quiet. `auth` emits through
//! `tracing`, whose `log` feature hands its events to the same loggers.

use crate::config::Config;
use log::LevelFilter;
use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger, TermLogger};
use std::fmt;
use std::str::FromStr;

/// WebSocket and HTTP stacks that log every frame. Silenced below Trace unless
/// named in `LOG_TARGETS`.
const NOISY_DEPENDENCIES: &[&str] = &["tokio_tungstenite", "tungstenite", "tower", "hyper", "axum"];

/// One `target=level` entry of `LOG_TARGETS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetLevel {
    pub target: String,
    pub level: LevelFilter,
}

impl FromStr for TargetLevel {
    type Err = String;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let (target, level) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected <target>=<level>, got {entry:?}"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(format!("missing target in {entry:?}"));
        }
        let level = level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| format!("unknown level in {entry:?}"))?;
        Ok(Self {
            target: target.replace('-', "_"),
            level,
        })
    }
}

impl fmt::Display for TargetLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.target, self.level)
    }
}

/// Which logger sees which targets.
///
/// The base logger ignores every overridden target, so an override can lower a
/// target's level as well as raise it. A later entry for the same target wins.
#[derive(Debug, PartialEq)]
struct LogPlan {
    base_level: LevelFilter,
    base_ignores: Vec<String>,
    overrides: Vec<TargetLevel>,
}

impl LogPlan {
    fn new(base_level: LevelFilter, targets: &[TargetLevel]) -> Self {
        let mut overrides: Vec<TargetLevel> = Vec::new();
        for entry in targets {
            overrides.retain(|o| o.target != entry.target);
            overrides.push(entry.clone());
        }

        let mut base_ignores: Vec<String> = overrides.iter().map(|o| o.target.clone()).collect();
        if base_level != LevelFilter::Trace {
            for dependency in NOISY_DEPENDENCIES {
                if !base_ignores.iter().any(|t| t == dependency) {
                    base_ignores.push(dependency.to_string());
                }
            }
        }

        Self {
            base_level,
            base_ignores,
            overrides,
        }
    }

    fn loggers(&self) -> Vec<Box<dyn SharedLogger>> {
        let mut base = base_config();
        for target in &self.base_ignores {
            base.add_filter_ignore(target.clone());
        }
        let mut loggers: Vec<Box<dyn SharedLogger>> = vec![term_logger(self.base_level, &mut base)];

        for entry in &self.overrides {
            let mut scoped = base_config();
            scoped.add_filter_allow(entry.target.clone());
            loggers.push(term_logger(entry.level, &mut scoped));
        }
        loggers
    }
}

fn base_config() -> ConfigBuilder {
    let mut builder = ConfigBuilder::new();
    builder.set_time_format_rfc3339();
    builder
}

fn term_logger(level: LevelFilter, builder: &mut ConfigBuilder) -> Box<dyn SharedLogger> {
    TermLogger::new(
        level,
        builder.build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
}

pub struct Logger {}

impl Logger {
    /// Installs the global logger for `log_level_filter` and `log_targets`.
    pub fn init_logger(config: &Config) {
        let plan = LogPlan::new(config.log_level_filter, &config.log_targets);
        CombinedLogger::init(plan.loggers()).expect("Failed to start simplelog");

        if !plan.overrides.is_empty() {
            let targets: Vec<String> = plan.overrides.iter().map(ToString::to_string).collect();
            log::info!("Log level overrides: {}", targets.join(","));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(spec: &[&str]) -> Vec<TargetLevel> {
        spec.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_target_level_parses_crate_names() {
        let entry: TargetLevel = "push-client = DEBUG".parse().unwrap();

        assert_eq!(entry.target, "push_client");
        assert_eq!(entry.level, LevelFilter::Debug);
        assert_eq!(entry.to_string(), "push_client=DEBUG");
    }

    #[test]
    fn test_target_level_rejects_bad_entries() {
        assert!("stream".parse::<TargetLevel>().is_err());
        assert!("=debug".parse::<TargetLevel>().is_err());
        assert!("stream=loud".parse::<TargetLevel>().is_err());
    }

    #[test]
    fn test_overridden_targets_leave_the_base_logger() {
        let plan = LogPlan::new(LevelFilter::Info, &targets(&["stream=debug", "auth=warn"]));

        assert_eq!(plan.base_ignores[..2], ["stream".to_string(), "auth".to_string()]);
        assert_eq!(plan.overrides.len(), 2);
        assert_eq!(plan.loggers().len(), 3);
    }

    #[test]
    fn test_last_override_for_a_target_wins() {
        let plan = LogPlan::new(LevelFilter::Info, &targets(&["stream=debug", "stream=error"]));

        assert_eq!(plan.overrides, targets(&["stream=error"]));
        assert_eq!(plan.base_ignores.iter().filter(|t| *t == "stream").count(), 1);
    }

    #[test]
    fn test_noisy_dependencies_are_silenced_below_trace() {
        let info = LogPlan::new(LevelFilter::Info, &[]);
        let trace = LogPlan::new(LevelFilter::Trace, &[]);

        assert_eq!(info.base_ignores, NOISY_DEPENDENCIES);
        assert!(trace.base_ignores.is_empty());
        assert_eq!(trace.loggers().len(), 1);
    }

    #[test]
    fn test_named_dependency_gets_its_own_level() {
        let plan = LogPlan::new(LevelFilter::Warn, &targets(&["hyper=debug"]));

        assert_eq!(plan.base_ignores.iter().filter(|t| *t == "hyper").count(), 1);
        assert_eq!(plan.overrides[0].level, LevelFilter::Debug);
    }
}
