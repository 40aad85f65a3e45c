//! センサー信号の条件付け（デコード・校正・温度補正）
//!
//! ハードウェア非依存の純粋ロジックのみを提供します。
//! I2C 通信は `reef_i2c` クレート側の責務です。
//!
//! ## モジュール構成
//! - `decode`: 生バイト列 → 物理量（ASCII 数値 / オフセットバイナリ ADC / ADS1115）
//! - `calibration`: アンカー点による校正（オフセット・線形・区分線形・導電率・ネルンスト）
//! - `temperature`: 注入温度の状態管理と基準温度への正規化
//! - `diagnostics`: 中間値と計算ガードの記録

pub mod calibration;
pub mod decode;
pub mod diagnostics;
pub mod temperature;

pub use calibration::{
    Anchor, AnchorSet, CalibrationError, Calibrator, ConductivityCalibration, LinearCalibration,
    NernstCalibration, PiecewiseCalibration, SlopeSource,
};
pub use decode::{
    ads1115_counts, parse_first_float, Ads1115Decoder, AdsGain, AdsMux, AsciiDecoder, DecodeError, Decoder,
    OffsetBinaryDecoder,
};
pub use diagnostics::{Diagnostics, Guard};
pub use temperature::{
    CompensationPoint, LinearCompensation, TemperatureCompensator, TemperatureSink,
    TemperatureState,
};
