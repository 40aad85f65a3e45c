use crate::config_validation::{
    parse_anchor, parse_channel, parse_gain, parse_optional_mv, validate_address, validate_finite,
    validate_positive, validate_range, ValidationError,
};
use conditioning_core::{AdsGain, AdsMux, CalibrationError};
use std::time::Duration;

/// ドライバ設定
///
/// この構造体はビルド時に `cfg.toml` ファイルから読み込まれた値を保持します。
/// ファイルが無い項目は `#[default(..)]` の値になります。
/// アンカー・校正値の 0（Robo-Tank pH は -1 も）は未設定を表します。
#[toml_cfg::toml_config]
pub struct Config {
    // Robo-Tank pH ボード
    #[default(0x62)]
    robotank_ph_address: u8,

    #[default(300)]
    robotank_ph_settle_ms: u64,

    #[default(0.0)]
    robotank_ph_obs4: f64,

    #[default(0.0)]
    robotank_ph_obs7: f64,

    #[default(0.0)]
    robotank_ph_obs10: f64,

    // Robo-Tank 導電率ボード
    #[default(0x6A)]
    robotank_cond_address: u8,

    #[default(200)]
    robotank_cond_settle_ms: u64,

    #[default(1010.0)] // RO/DI 水での |U-V|
    robotank_cond_abs_d_fresh: f64,

    #[default(24.328)] // 53,000 µS/cm 標準液での |U-V|
    robotank_cond_abs_d_standard: f64,

    #[default(0.0015)]
    robotank_cond_alpha_per_c: f64,

    #[default(true)]
    robotank_cond_temp_comp: bool,

    // AliExpress pH モジュール
    #[default(0x24)]
    adc_ph_address: u8,

    #[default(2.5)]
    adc_ph_vref_v: f64,

    #[default(0.0)]
    adc_ph_ph7_mv: f64,

    #[default(0.0)]
    adc_ph_ph4_mv: f64,

    #[default(0.0)]
    adc_ph_ph10_mv: f64,

    #[default(0.0)] // 0 なら校正値から求める
    adc_ph_slope_mv_per_ph: f64,

    #[default(false)]
    adc_ph_temp_comp: bool,

    // AliExpress ORP モジュール
    #[default(0x24)]
    adc_orp_address: u8,

    #[default(2.5)]
    adc_orp_vref_v: f64,

    #[default(0.0)]
    adc_orp_offset_mv: f64,

    // ADS1115 TDS
    #[default(0x48)]
    tds_address: u8,

    #[default(0)]
    tds_channel: u8,

    #[default("1")]
    tds_gain: &'static str,

    #[default(1.0)]
    tds_k: f64,

    #[default(0.0)]
    tds_offset: f64,

    #[default(3.3)]
    tds_clamp_v: f64,

    #[default(0.02)]
    tds_alpha_per_c: f64,

    #[default(false)]
    tds_temp_comp: bool,

    // 共通
    #[default(25.0)]
    ref_temp_c: f64,

    #[default(120)]
    temp_stale_after_secs: u64,

    #[default(250)]
    cache_max_age_ms: u64,

    #[default(35)]
    min_gap_ms: u64,

    #[default(0.0)]
    ph_output_min: f64,

    #[default(14.0)]
    ph_output_max: f64,

    #[default(1.2)]
    cond_overshoot_limit: f64,
}

/// 設定エラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("無効な I2C アドレス: 0x{0:02X} (0x03-0x77)")]
    InvalidAddress(u8),
    #[error("{name} は正の値である必要があります: {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("{name} が有限の数値ではありません: {value}")]
    NonFinite { name: &'static str, value: f64 },
    #[error("無効な ADS1115 ゲイン: {0} (2/3, 1, 2, 4, 8, 16)")]
    InvalidGain(String),
    #[error("無効な ADS1115 チャンネル: {0} (0-3)")]
    InvalidChannel(u8),
    #[error("無効な範囲: [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },
    #[error("校正値が不正です: {0}")]
    Calibration(#[from] CalibrationError),
}

impl From<ValidationError> for ConfigError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidAddress(a) => ConfigError::InvalidAddress(a),
            ValidationError::NonPositive { name, value } => ConfigError::NonPositive { name, value },
            ValidationError::NonFinite { name, value } => ConfigError::NonFinite { name, value },
            ValidationError::InvalidGain(g) => ConfigError::InvalidGain(g),
            ValidationError::InvalidChannel(c) => ConfigError::InvalidChannel(c),
            ValidationError::InvalidRange { min, max } => ConfigError::InvalidRange { min, max },
        }
    }
}

/// 温度補正まわりの共通設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSettings {
    pub ref_temp_c: f64,
    pub stale_after: Duration,
}

impl Default for TemperatureSettings {
    fn default() -> Self {
        Self {
            ref_temp_c: 25.0,
            stale_after: Duration::from_secs(120),
        }
    }
}

impl TemperatureSettings {
    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            ref_temp_c: validate_finite("ref_temp_c", config.ref_temp_c)?,
            stale_after: Duration::from_secs(config.temp_stale_after_secs),
        })
    }
}

/// Robo-Tank pH ボード
#[derive(Debug, Clone, PartialEq)]
pub struct RoboTankPhSettings {
    pub address: u8,
    pub settle: Duration,
    pub obs4: Option<f64>,
    pub obs7: Option<f64>,
    pub obs10: Option<f64>,
    /// 校正前のボード値を収める範囲
    pub raw_range: (f64, f64),
    pub output_range: (f64, f64),
}

impl Default for RoboTankPhSettings {
    fn default() -> Self {
        Self {
            address: 0x62,
            settle: Duration::from_millis(300),
            obs4: None,
            obs7: None,
            obs10: None,
            raw_range: (-1.0, 15.0),
            output_range: (0.0, 14.0),
        }
    }
}

impl RoboTankPhSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            address: validate_address(config.robotank_ph_address)?,
            settle: Duration::from_millis(config.robotank_ph_settle_ms),
            obs4: parse_anchor("robotank_ph_obs4", config.robotank_ph_obs4)?,
            obs7: parse_anchor("robotank_ph_obs7", config.robotank_ph_obs7)?,
            obs10: parse_anchor("robotank_ph_obs10", config.robotank_ph_obs10)?,
            output_range: validate_range(config.ph_output_min, config.ph_output_max)?,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(self.address)?;
        validate_range(self.raw_range.0, self.raw_range.1)?;
        validate_range(self.output_range.0, self.output_range.1)?;
        Ok(())
    }
}

/// Robo-Tank 導電率ボード
#[derive(Debug, Clone, PartialEq)]
pub struct RoboTankConductivitySettings {
    pub address: u8,
    pub settle: Duration,
    pub abs_d_fresh: f64,
    pub abs_d_standard: f64,
    /// 標準液の導電率（µS/cm @ 基準温度）
    pub reference_us: f64,
    pub overshoot_limit: f64,
    pub alpha_per_c: f64,
    pub temp_comp: bool,
    pub temperature: TemperatureSettings,
}

impl Default for RoboTankConductivitySettings {
    fn default() -> Self {
        Self {
            address: 0x6A,
            settle: Duration::from_millis(200),
            abs_d_fresh: 1010.0,
            abs_d_standard: 24.328,
            reference_us: 53_000.0,
            overshoot_limit: 1.2,
            alpha_per_c: 0.0015,
            temp_comp: true,
            temperature: TemperatureSettings::default(),
        }
    }
}

impl RoboTankConductivitySettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            address: validate_address(config.robotank_cond_address)?,
            settle: Duration::from_millis(config.robotank_cond_settle_ms),
            abs_d_fresh: validate_finite("robotank_cond_abs_d_fresh", config.robotank_cond_abs_d_fresh)?,
            abs_d_standard: validate_finite(
                "robotank_cond_abs_d_standard",
                config.robotank_cond_abs_d_standard,
            )?,
            overshoot_limit: validate_positive("cond_overshoot_limit", config.cond_overshoot_limit)?,
            alpha_per_c: validate_finite("robotank_cond_alpha_per_c", config.robotank_cond_alpha_per_c)?,
            temp_comp: config.robotank_cond_temp_comp,
            temperature: TemperatureSettings::from_config(config)?,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(self.address)?;
        validate_finite("abs_d_fresh", self.abs_d_fresh)?;
        validate_finite("abs_d_standard", self.abs_d_standard)?;
        validate_positive("reference_us", self.reference_us)?;
        validate_positive("overshoot_limit", self.overshoot_limit)?;
        validate_finite("alpha_per_c", self.alpha_per_c)?;
        Ok(())
    }
}

/// 3 バイト ADC の取得タイミング
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub cache_max_age: Duration,
    pub min_gap: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            cache_max_age: Duration::from_millis(250),
            min_gap: Duration::from_millis(35),
        }
    }
}

impl AcquisitionSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            cache_max_age: Duration::from_millis(config.cache_max_age_ms),
            min_gap: Duration::from_millis(config.min_gap_ms),
        }
    }
}

/// AliExpress pH モジュール
#[derive(Debug, Clone, PartialEq)]
pub struct AdcPhSettings {
    pub address: u8,
    pub vref_v: f64,
    pub ph7_mv: f64,
    pub ph4_mv: Option<f64>,
    pub ph10_mv: Option<f64>,
    pub slope_override: Option<f64>,
    pub temp_comp: bool,
    pub output_range: (f64, f64),
    pub temperature: TemperatureSettings,
    pub acquisition: AcquisitionSettings,
}

impl Default for AdcPhSettings {
    fn default() -> Self {
        Self {
            address: 0x24,
            vref_v: 2.5,
            ph7_mv: 0.0,
            ph4_mv: None,
            ph10_mv: None,
            slope_override: None,
            temp_comp: false,
            output_range: (0.0, 14.0),
            temperature: TemperatureSettings::default(),
            acquisition: AcquisitionSettings::default(),
        }
    }
}

impl AdcPhSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            address: validate_address(config.adc_ph_address)?,
            vref_v: validate_positive("adc_ph_vref_v", config.adc_ph_vref_v)?,
            ph7_mv: validate_finite("adc_ph_ph7_mv", config.adc_ph_ph7_mv)?,
            ph4_mv: parse_optional_mv("adc_ph_ph4_mv", config.adc_ph_ph4_mv)?,
            ph10_mv: parse_optional_mv("adc_ph_ph10_mv", config.adc_ph_ph10_mv)?,
            slope_override: parse_optional_mv("adc_ph_slope_mv_per_ph", config.adc_ph_slope_mv_per_ph)?,
            temp_comp: config.adc_ph_temp_comp,
            output_range: validate_range(config.ph_output_min, config.ph_output_max)?,
            temperature: TemperatureSettings::from_config(config)?,
            acquisition: AcquisitionSettings::from_config(config),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(self.address)?;
        validate_positive("vref_v", self.vref_v)?;
        validate_finite("ph7_mv", self.ph7_mv)?;
        validate_range(self.output_range.0, self.output_range.1)?;
        Ok(())
    }
}

/// AliExpress ORP モジュール
#[derive(Debug, Clone, PartialEq)]
pub struct AdcOrpSettings {
    pub address: u8,
    pub vref_v: f64,
    pub offset_mv: f64,
    pub acquisition: AcquisitionSettings,
}

impl Default for AdcOrpSettings {
    fn default() -> Self {
        Self {
            address: 0x24,
            vref_v: 2.5,
            offset_mv: 0.0,
            acquisition: AcquisitionSettings::default(),
        }
    }
}

impl AdcOrpSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            address: validate_address(config.adc_orp_address)?,
            vref_v: validate_positive("adc_orp_vref_v", config.adc_orp_vref_v)?,
            offset_mv: validate_finite("adc_orp_offset_mv", config.adc_orp_offset_mv)?,
            acquisition: AcquisitionSettings::from_config(config),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(self.address)?;
        validate_positive("vref_v", self.vref_v)?;
        validate_finite("offset_mv", self.offset_mv)?;
        Ok(())
    }
}

/// ADS1115 TDS
#[derive(Debug, Clone, PartialEq)]
pub struct Ads1115TdsSettings {
    pub address: u8,
    pub mux: AdsMux,
    pub gain: AdsGain,
    pub k: f64,
    pub offset: f64,
    pub clamp_v: f64,
    pub alpha_per_c: f64,
    pub temp_comp: bool,
    pub poll_interval: Duration,
    pub conversion_timeout: Duration,
    pub temperature: TemperatureSettings,
    pub acquisition: AcquisitionSettings,
}

impl Default for Ads1115TdsSettings {
    fn default() -> Self {
        Self {
            address: 0x48,
            mux: AdsMux::Ain0,
            gain: AdsGain::One,
            k: 1.0,
            offset: 0.0,
            clamp_v: 3.3,
            alpha_per_c: 0.02,
            temp_comp: false,
            poll_interval: Duration::from_micros(200),
            conversion_timeout: Duration::from_millis(50),
            temperature: TemperatureSettings::default(),
            acquisition: AcquisitionSettings::default(),
        }
    }
}

impl Ads1115TdsSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            address: validate_address(config.tds_address)?,
            mux: parse_channel(config.tds_channel)?,
            gain: parse_gain(config.tds_gain)?,
            k: validate_finite("tds_k", config.tds_k)?,
            offset: validate_finite("tds_offset", config.tds_offset)?,
            clamp_v: validate_positive("tds_clamp_v", config.tds_clamp_v)?,
            alpha_per_c: validate_finite("tds_alpha_per_c", config.tds_alpha_per_c)?,
            temp_comp: config.tds_temp_comp,
            temperature: TemperatureSettings::from_config(config)?,
            acquisition: AcquisitionSettings::from_config(config),
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(self.address)?;
        validate_finite("k", self.k)?;
        validate_finite("offset", self.offset)?;
        validate_positive("clamp_v", self.clamp_v)?;
        validate_finite("alpha_per_c", self.alpha_per_c)?;
        Ok(())
    }
}

/// 全ドライバの設定
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub robotank_ph: RoboTankPhSettings,
    pub robotank_conductivity: RoboTankConductivitySettings,
    pub adc_ph: AdcPhSettings,
    pub adc_orp: AdcOrpSettings,
    pub ads1115_tds: Ads1115TdsSettings,
}

impl DriverSettings {
    /// 設定ファイルから設定をロードします
    pub fn load() -> Result<Self, ConfigError> {
        // toml_cfg によって生成された定数
        Self::from_config(&CONFIG)
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            robotank_ph: RoboTankPhSettings::from_config(config)?,
            robotank_conductivity: RoboTankConductivitySettings::from_config(config)?,
            adc_ph: AdcPhSettings::from_config(config)?,
            adc_orp: AdcOrpSettings::from_config(config)?,
            ads1115_tds: Ads1115TdsSettings::from_config(config)?,
        })
    }
}
