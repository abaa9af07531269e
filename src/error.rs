use thiserror::Error;

/// Failure taxonomy for the replay core.
///
/// Only `CapitalExhausted` and `Configuration` are fatal; the executor
/// recovers the other variants locally and logs them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("no data for {instrument} at {time_key}")]
    MissingData { time_key: String, instrument: String },

    #[error("insufficient cash to buy {instrument}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        instrument: String,
        required: f64,
        available: f64,
    },

    #[error("no open position in {instrument} to sell")]
    InvalidSellTarget { instrument: String },

    #[error("net worth {net_worth:.2} fell below minimum {minimum:.2} at {time_key}")]
    CapitalExhausted {
        time_key: String,
        net_worth: f64,
        minimum: f64,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid time key '{0}' (expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)")]
    InvalidTimeKey(String),

    #[error("market data snapshot error: {0}")]
    Snapshot(String),
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    /// Whether the replay must stop when this error is raised.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineError::CapitalExhausted { .. } | EngineError::Configuration(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_and_configuration_are_terminal() {
        let exhausted = EngineError::CapitalExhausted {
            time_key: "2020-01-02".to_string(),
            net_worth: 40.0,
            minimum: 50.0,
        };
        assert!(exhausted.is_terminal());
        assert!(EngineError::config("bad window").is_terminal());
        assert!(!EngineError::InvalidTimeKey("x".to_string()).is_terminal());
        assert!(!EngineError::InvalidSellTarget {
            instrument: "AAA".to_string()
        }
        .is_terminal());
    }
}
