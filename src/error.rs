use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input data for fixture {fixture_id}: {reason}")]
    InvalidInputData { fixture_id: u64, reason: String },

    #[error("invalid market data for fixture {fixture_id}: {reason}")]
    InvalidMarketData { fixture_id: u64, reason: String },

    #[error("incomplete result for fixture {fixture_id}: {reason}")]
    IncompleteResult { fixture_id: u64, reason: String },

    #[error("fixture {fixture_id} is not finished (status: {status})")]
    MatchNotFinished { fixture_id: u64, status: String },

    #[error("another recommendation refresh is already in progress")]
    StaleRefreshRace,

    #[error("unknown fixture {0}")]
    UnknownFixture(u64),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("export error: {0}")]
    Export(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn invalid_input(fixture_id: u64, reason: impl Into<String>) -> Self {
        Self::InvalidInputData {
            fixture_id,
            reason: reason.into(),
        }
    }

    pub fn invalid_market(fixture_id: u64, reason: impl Into<String>) -> Self {
        Self::InvalidMarketData {
            fixture_id,
            reason: reason.into(),
        }
    }

    pub fn incomplete_result(fixture_id: u64, reason: impl Into<String>) -> Self {
        Self::IncompleteResult {
            fixture_id,
            reason: reason.into(),
        }
    }

    /// Fixture-scoped errors skip one fixture; everything else aborts the batch.
    pub fn is_per_fixture(&self) -> bool {
        matches!(
            self,
            Self::InvalidInputData { .. }
                | Self::InvalidMarketData { .. }
                | Self::IncompleteResult { .. }
                | Self::MatchNotFinished { .. }
                | Self::UnknownFixture(_)
        )
    }
}
