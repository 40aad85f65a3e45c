/*!
 * # Aquarium Sensor Drivers
 *
 * 水槽コントローラー向けのアナログセンサードライバ（pH / 導電率・塩分 / ORP / TDS）
 *
 * 共有 I2C バスからの取得（`reef_i2c`）と、デコード・校正・温度補正
 * （`conditioning_core`）を汎用パイプラインで組み合わせます。
 *
 * ## モジュール構成
 * - `config`: ビルド時設定（cfg.toml）とドライバごとの設定構造体
 * - `config_validation`: 設定値の検証
 * - `drivers`: センサードライバ（Robo-Tank pH / 導電率、AliExpress pH / ORP、ADS1115 TDS）
 * - `error`: 呼び出し元へ返すエラーと失敗段
 * - `pipeline`: 汎用パイプライン、測定値、`AnalogSensor` トレイト
 */

// 公開モジュール
pub mod config;
pub mod config_validation;
pub mod drivers;
pub mod error;
pub mod pipeline;

pub use conditioning_core;
pub use reef_i2c;

// 内部で使用する型をまとめてエクスポート
pub use conditioning_core::{Diagnostics, Guard, TemperatureSink};
pub use config::{
    AdcOrpSettings, AdcPhSettings, Ads1115TdsSettings, ConfigError, DriverSettings,
    RoboTankConductivitySettings, RoboTankPhSettings,
};
pub use drivers::{AdcOrp, AdcPh, Ads1115Tds, RoboTankConductivity, RoboTankPh};
pub use error::{FailureStage, SensorError};
pub use pipeline::{AnalogSensor, CalibrationPoint, Measurement, Pipeline, Unit};
pub use reef_i2c::{BusError, HalBus, I2cBus};

/// ライブラリのバージョン情報
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
