use serde::{Deserialize, Serialize};

use crate::time::RepeatingInterval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Schedule,
    Manual,
}

impl Mode {
    pub fn is_manual(&self) -> bool {
        matches!(self, Mode::Manual)
    }
}

/// `close_time` windows when trains auto-close. A write that fails schema
/// validation is rejected by the persistence port, which leaves the
/// stored config at `Options::default()` and records `validation_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    pub close_time: Vec<RepeatingInterval>,
    /// Set by the persistence port when the last write attempt failed
    /// validation; cleared on the next successful write.
    pub validation_error: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            close_time: Vec::new(),
            validation_error: None,
        }
    }
}

impl Options {
    pub fn in_close_time(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.close_time.iter().any(|i| i.includes(now))
    }
}

/// Singleton process config.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub mode: Mode,
    pub options: Options,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Schedule,
            options: Options::default(),
        }
    }
}
