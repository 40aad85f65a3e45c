//! ADS1115 による TDS プローブ
//!
//! single-ended チャンネルを単発変換で読み、電圧を 25℃ 基準へ正規化してから
//! `TDS = k * volts + offset` で ppm に換算します。

use crate::config::{Ads1115TdsSettings, ConfigError};
use crate::error::SensorError;
use crate::pipeline::{AnalogSensor, CalibrationPoint, Measurement, Pipeline, Unit};
use conditioning_core::{
    ads1115_counts, Ads1115Decoder, AdsGain, AdsMux, CompensationPoint, DecodeError, Decoder,
    Diagnostics, LinearCalibration, LinearCompensation, TemperatureCompensator, TemperatureSink,
};
use log::debug;
use reef_i2c::{Conversion, I2cBus, RegisterTiming, RegisterTransactor};

pub const REG_CONVERSION: u8 = 0x00;
pub const REG_CONFIG: u8 = 0x01;

/// OS: 単発変換開始（読み出し時は変換完了）
const CONFIG_OS_SINGLE: u16 = 0x8000;
const CONFIG_MODE_SINGLE: u16 = 0x0100;
const CONFIG_DR_860SPS: u16 = 0x00E0;
const CONFIG_COMP_DISABLE: u16 = 0x0003;

/// 単発変換の設定ワード
pub fn config_word(mux: AdsMux, gain: AdsGain) -> u16 {
    CONFIG_OS_SINGLE
        | mux.config_bits()
        | gain.config_bits()
        | CONFIG_MODE_SINGLE
        | CONFIG_DR_860SPS
        | CONFIG_COMP_DISABLE
}

pub struct Ads1115Tds<B> {
    transactor: RegisterTransactor<B>,
    conversion: Conversion,
    pipeline: Pipeline<Ads1115Decoder, LinearCalibration>,
}

impl<B: I2cBus> Ads1115Tds<B> {
    pub fn new(bus: B, settings: Ads1115TdsSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let conversion = Conversion {
            config_register: REG_CONFIG,
            result_register: REG_CONVERSION,
            config: config_word(settings.mux, settings.gain),
            ready_mask: CONFIG_OS_SINGLE,
            result_len: 2,
        };
        let timing = RegisterTiming {
            poll_interval: settings.poll_interval,
            timeout: settings.conversion_timeout,
            cache_max_age: settings.acquisition.cache_max_age,
            min_gap: settings.acquisition.min_gap,
            ..RegisterTiming::default()
        };

        let decoder = Ads1115Decoder {
            gain: settings.gain,
            clamp_v: settings.clamp_v,
        };
        let calibration = LinearCalibration {
            gain: settings.k,
            offset: settings.offset,
        };
        let compensator = TemperatureCompensator::new(settings.temp_comp)
            .with_stale_after(settings.temperature.stale_after);
        let model = LinearCompensation::new(settings.alpha_per_c, settings.temperature.ref_temp_c);

        debug!(
            "ads1115 0x{:02X}: ch={} gain={:?} cfg=0x{:04X}",
            settings.address,
            settings.mux.channel(),
            settings.gain,
            conversion.config
        );

        Ok(Self {
            transactor: RegisterTransactor::new(bus, settings.address, timing),
            conversion,
            pipeline: Pipeline::new(decoder, calibration, settings.temperature.ref_temp_c)
                .with_compensation(compensator, CompensationPoint::BeforeCalibration)
                .with_linear_model(model),
        })
    }

    pub fn address(&self) -> u8 {
        self.transactor.address()
    }

    pub fn config_word(&self) -> u16 {
        self.conversion.config
    }

    /// クランプ済みの入力電圧（V）
    ///
    /// キャッシュヒット時もキャッシュした変換結果を再デコードし、
    /// クランプや負コードのガードを記録します。
    pub fn read_volts(&self, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        let decoder = self.pipeline.decoder();
        let fetched = self.transactor.convert(&self.conversion, |raw| {
            let counts = ads1115_counts(raw)?;
            let volts = decoder.decode(raw, diag)?;
            Ok::<_, DecodeError>((i64::from(counts), volts))
        })?;

        if fetched.from_cache {
            decoder.decode(&fetched.sample.raw, diag)?;
            diag.note("cached sample");
        }
        diag.record("volts", fetched.sample.value);
        Ok(fetched.sample.value)
    }
}

impl<B: I2cBus> AnalogSensor for Ads1115Tds<B> {
    fn name(&self) -> &'static str {
        "ads1115_tds"
    }

    fn unit(&self) -> Unit {
        Unit::Ppm
    }

    fn read(&self) -> Result<Measurement, SensorError> {
        let mut diag = Diagnostics::new();
        let volts = self.read_volts(&mut diag)?;
        let ppm = self.pipeline.condition(volts, &mut diag)?;
        Ok(Measurement::new(ppm, Unit::Ppm, diag))
    }

    /// k / offset は設定でのみ変更できます
    fn calibrate(&self, points: &[CalibrationPoint]) -> Result<(), SensorError> {
        match points.first() {
            None => Ok(()),
            Some(point) => Err(SensorError::UnsupportedCalibration {
                expected: point.expected,
                supported: "none (set tds_k / tds_offset)",
            }),
        }
    }

    fn temperature_sink(&self) -> Option<&dyn TemperatureSink> {
        Some(&self.pipeline)
    }
}
