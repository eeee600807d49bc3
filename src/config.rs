//! Layer configuration.
//!
//! Options are read once when the layer is attached to a device. They can
//! come from the environment (the usual way a loader configures an
//! interposer) or be supplied directly, which is what the tests do.

use std::env;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::diagnostics::Severity;

bitflags! {
    /// Selects where diagnostics are delivered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugAction: u32 {
        /// Write to the log sink (file or standard output).
        const LOG_MSG = 0b001;
        /// Invoke every registered callback.
        const CALLBACK = 0b010;
        /// Marker requesting a debugger break. The tracker never aborts,
        /// so this only tags the report; see `Reporter`.
        const BREAK = 0b100;
    }
}

/// Configuration consulted once at layer initialization.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Minimum severity that is reported at all.
    pub report_level: Severity,
    /// Sink selection. `default_action` below tracks whether this still
    /// is the built-in default, which matters for callback registration.
    pub debug_action: DebugAction,
    /// Whether `debug_action` was left at its default. Registering the
    /// first diagnostic callback flips a default action to callback-only
    /// and unregistering the last flips it back.
    pub action_is_default: bool,
    /// Log sink path. `None` or an unopenable path falls back to stdout.
    pub log_file: Option<PathBuf>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            report_level: Severity::Info,
            debug_action: DebugAction::LOG_MSG,
            action_is_default: true,
            log_file: None,
        }
    }
}

impl LayerConfig {
    pub const ENV_REPORT_LEVEL: &'static str = "MEMTRACK_REPORT_LEVEL";
    pub const ENV_DEBUG_ACTION: &'static str = "MEMTRACK_DEBUG_ACTION";
    pub const ENV_LOG_FILE: &'static str = "MEMTRACK_LOG_FILE";

    /// Builds a configuration from the `MEMTRACK_*` environment
    /// variables. Unset or malformed values keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var(Self::ENV_REPORT_LEVEL) {
            if let Some(level) = parse_report_level(&value) {
                config.report_level = level;
            } else {
                log::warn!("Unknown {} value {:?}", Self::ENV_REPORT_LEVEL, value);
            }
        }

        if let Ok(value) = env::var(Self::ENV_DEBUG_ACTION) {
            if let Some(action) = parse_debug_action(&value) {
                config.debug_action = action;
                config.action_is_default = false;
            } else {
                log::warn!("Unknown {} value {:?}", Self::ENV_DEBUG_ACTION, value);
            }
        }

        if let Ok(value) = env::var(Self::ENV_LOG_FILE) {
            if !value.is_empty() {
                config.log_file = Some(PathBuf::from(value));
            }
        }

        config
    }

    pub fn with_report_level(mut self, level: Severity) -> Self {
        self.report_level = level;
        self
    }

    pub fn with_debug_action(mut self, action: DebugAction) -> Self {
        self.debug_action = action;
        self.action_is_default = false;
        self
    }
}

fn parse_report_level(value: &str) -> Option<Severity> {
    match value.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Severity::Error),
        "warn" | "warning" => Some(Severity::Warning),
        "info" => Some(Severity::Info),
        _ => None,
    }
}

fn parse_debug_action(value: &str) -> Option<DebugAction> {
    let mut action = DebugAction::empty();
    for part in value.split(',') {
        match part.trim().to_ascii_lowercase().as_str() {
            "log" | "log_msg" => action |= DebugAction::LOG_MSG,
            "callback" => action |= DebugAction::CALLBACK,
            "break" => action |= DebugAction::BREAK,
            "" => {}
            _ => return None,
        }
    }
    if action.is_empty() {
        None
    } else {
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels() {
        assert_eq!(parse_report_level("error"), Some(Severity::Error));
        assert_eq!(parse_report_level(" Warn "), Some(Severity::Warning));
        assert_eq!(parse_report_level("info"), Some(Severity::Info));
        assert_eq!(parse_report_level("verbose"), None);
    }

    #[test]
    fn parse_actions() {
        assert_eq!(parse_debug_action("log"), Some(DebugAction::LOG_MSG));
        assert_eq!(
            parse_debug_action("log,callback"),
            Some(DebugAction::LOG_MSG | DebugAction::CALLBACK)
        );
        assert_eq!(
            parse_debug_action("break"),
            Some(DebugAction::BREAK)
        );
        assert_eq!(parse_debug_action(""), None);
        assert_eq!(parse_debug_action("log,nonsense"), None);
    }

    #[test]
    fn default_config() {
        let config = LayerConfig::default();
        assert_eq!(config.report_level, Severity::Info);
        assert_eq!(config.debug_action, DebugAction::LOG_MSG);
        assert!(config.action_is_default);
        assert!(config.log_file.is_none());
    }
}
