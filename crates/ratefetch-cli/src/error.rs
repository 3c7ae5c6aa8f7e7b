use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ratefetch_core::ConfigError),

    #[error(transparent)]
    Fetch(#[from] ratefetch_core::FetchError),

    #[error("invalid parameter '{value}': expected NAME=VALUE")]
    InvalidParam { value: String },

    #[error("strict mode failed: lost_pages={lost_pages}, missing_ids={missing_ids}, truncated={truncated}")]
    StrictModeViolation {
        lost_pages: usize,
        missing_ids: usize,
        truncated: bool,
    },

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::InvalidParam { .. } => 2,
            Self::Command(_) => 2,
            Self::Fetch(_) => 3,
            Self::Serialization(_) => 4,
            Self::StrictModeViolation { .. } => 5,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_separate_usage_from_upstream_failures() {
        let usage = CliError::InvalidParam {
            value: String::from("with"),
        };
        let upstream = CliError::from(ratefetch_core::FetchError::rate_limited("quota"));
        let strict = CliError::StrictModeViolation {
            lost_pages: 1,
            missing_ids: 0,
            truncated: false,
        };

        assert_eq!(usage.exit_code(), 2);
        assert_eq!(upstream.exit_code(), 3);
        assert_eq!(strict.exit_code(), 5);
    }
}
