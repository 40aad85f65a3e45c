//! センサードライバ
//!
//! 各ドライバは `reef_i2c` のトランザクタでバスから観測値を取り出し、
//! `Pipeline` で校正・温度補正して `Measurement` を返します。

pub mod adc_orp;
pub mod adc_ph;
pub mod ads1115_tds;
pub mod robotank_conductivity;
pub mod robotank_ph;

pub use adc_orp::AdcOrp;
pub use adc_ph::AdcPh;
pub use ads1115_tds::Ads1115Tds;
pub use robotank_conductivity::RoboTankConductivity;
pub use robotank_ph::RoboTankPh;

use crate::error::SensorError;
use conditioning_core::{Diagnostics, OffsetBinaryDecoder};
use reef_i2c::{Fetched, FrameSampler, I2cBus};

/// 校正点の基準値を、対応している値のいずれかと照合します
pub(crate) fn match_expected(
    expected: f64,
    supported: &[f64],
    label: &'static str,
) -> Result<f64, SensorError> {
    supported
        .iter()
        .copied()
        .find(|s| (expected - s).abs() < 1e-6)
        .ok_or(SensorError::UnsupportedCalibration {
            expected,
            supported: label,
        })
}

/// 3 バイトフレームを読み、`(code, mV)` をキャッシュに残す
pub(crate) fn read_offset_binary<B: I2cBus>(
    sampler: &FrameSampler<B>,
    decoder: &OffsetBinaryDecoder,
) -> Result<Fetched, SensorError> {
    let fetched = sampler.sample(|frame| {
        decoder
            .code_and_millivolts(frame)
            .map(|(code, mv)| (i64::from(code), mv))
    })?;
    Ok(fetched)
}

pub(crate) fn record_sample(fetched: &Fetched, diag: &mut Diagnostics) {
    diag.record("adc_code", fetched.sample.code as f64);
    diag.record("mv", fetched.sample.value);
    if fetched.from_cache {
        diag.note("cached sample");
    }
}
