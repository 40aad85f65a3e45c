use conditioning_core::{AdsGain, AdsMux};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidAddress(u8),
    NonPositive { name: &'static str, value: f64 },
    NonFinite { name: &'static str, value: f64 },
    InvalidGain(String),
    InvalidChannel(u8),
    InvalidRange { min: f64, max: f64 },
}

/// 7bit I2C アドレス（予約領域を除く 0x03-0x77）
pub fn validate_address(address: u8) -> Result<u8, ValidationError> {
    if (0x03..=0x77).contains(&address) {
        Ok(address)
    } else {
        Err(ValidationError::InvalidAddress(address))
    }
}

pub fn validate_finite(name: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite { name, value })
    }
}

pub fn validate_positive(name: &'static str, value: f64) -> Result<f64, ValidationError> {
    let value = validate_finite(name, value)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(ValidationError::NonPositive { name, value })
    }
}

/// アンカーの観測値。0 以下（番兵値 -1 を含む）は未設定
pub fn parse_anchor(name: &'static str, value: f64) -> Result<Option<f64>, ValidationError> {
    let value = validate_finite(name, value)?;
    if value <= 0.0 {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// mV の校正値。ちょうど 0 は未設定（負の mV は有効）
pub fn parse_optional_mv(name: &'static str, value: f64) -> Result<Option<f64>, ValidationError> {
    let value = validate_finite(name, value)?;
    if value == 0.0 {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

pub fn parse_gain(label: &str) -> Result<AdsGain, ValidationError> {
    AdsGain::from_label(label).ok_or_else(|| ValidationError::InvalidGain(label.to_string()))
}

pub fn parse_channel(channel: u8) -> Result<AdsMux, ValidationError> {
    AdsMux::single_ended(channel).ok_or(ValidationError::InvalidChannel(channel))
}

pub fn validate_range(min: f64, max: f64) -> Result<(f64, f64), ValidationError> {
    if min.is_finite() && max.is_finite() && min < max {
        Ok((min, max))
    } else {
        Err(ValidationError::InvalidRange { min, max })
    }
}
