use conditioning_core::{CalibrationError, DecodeError};
use reef_i2c::{BusError, QueryError};

/// 失敗した処理段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Transport,
    Timeout,
    Protocol,
    Parse,
    Configuration,
}

/// センサー読み出し・校正のエラー
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("{0}")]
    Bus(#[from] BusError),
    #[error("parse error: {0}")]
    Decode(#[from] DecodeError),
    #[error("parse error after {attempts} attempt(s), response {response:?}: {source}")]
    Parse {
        response: String,
        attempts: usize,
        #[source]
        source: DecodeError,
    },
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("unsupported calibration point expected={expected} (use {supported})")]
    UnsupportedCalibration {
        expected: f64,
        supported: &'static str,
    },
}

impl From<QueryError<DecodeError>> for SensorError {
    fn from(error: QueryError<DecodeError>) -> Self {
        match error {
            QueryError::Bus(e) => SensorError::Bus(e),
            QueryError::Decode {
                response,
                attempts,
                source,
            } => SensorError::Parse {
                response,
                attempts,
                source,
            },
        }
    }
}

impl SensorError {
    pub fn stage(&self) -> FailureStage {
        match self {
            SensorError::Bus(BusError::Transport { .. }) => FailureStage::Transport,
            SensorError::Bus(BusError::Timeout { .. }) => FailureStage::Timeout,
            SensorError::Bus(BusError::Protocol { .. }) => FailureStage::Protocol,
            SensorError::Decode(_) | SensorError::Parse { .. } => FailureStage::Parse,
            SensorError::Calibration(_) | SensorError::UnsupportedCalibration { .. } => {
                FailureStage::Configuration
            }
        }
    }
}
