use std::fmt;

// Exit codes of the media engine process.
pub const SUCCESS: i32 = 0;
pub const SETTINGS_ERROR: i32 = 42;

/// How the engine process ended, as reported by whoever spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited with code 0.
    Clean,
    /// Rejected its settings at startup.
    Settings,
    /// Any other exit code, or killed by a signal (`None`).
    Unexpected(Option<i32>),
}

impl WorkerExit {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(SUCCESS) => Self::Clean,
            Some(SETTINGS_ERROR) => Self::Settings,
            other => Self::Unexpected(other),
        }
    }

    pub fn code(self) -> Option<i32> {
        match self {
            Self::Clean => Some(SUCCESS),
            Self::Settings => Some(SETTINGS_ERROR),
            Self::Unexpected(code) => code,
        }
    }

    pub fn is_settings_error(self) -> bool {
        self == Self::Settings
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("worker exited cleanly"),
            Self::Settings => write!(f, "worker rejected its settings (code {SETTINGS_ERROR})"),
            Self::Unexpected(Some(code)) => write!(f, "worker died unexpectedly (code {code})"),
            Self::Unexpected(None) => f.write_str("worker died unexpectedly (signal)"),
        }
    }
}
