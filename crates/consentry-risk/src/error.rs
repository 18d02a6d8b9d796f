use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid risk configuration: {0}")]
    InvalidConfig(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
