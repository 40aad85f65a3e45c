//! AliExpress pH モジュール（3 バイト オフセットバイナリ ADC）
//!
//! 電極電位（mV）を読み、pH7 の mV と傾き（mV/pH）から pH を求めます。
//! 温度補正が有効なら、傾きを絶対温度比でスケーリングします。

use crate::config::{AdcPhSettings, ConfigError};
use crate::drivers::{match_expected, read_offset_binary, record_sample};
use crate::error::SensorError;
use crate::pipeline::{AnalogSensor, CalibrationPoint, Measurement, Pipeline, Unit};
use conditioning_core::{
    CompensationPoint, Diagnostics, NernstCalibration, OffsetBinaryDecoder,
    TemperatureCompensator, TemperatureSink,
};
use log::info;
use reef_i2c::{FrameSampler, I2cBus, SamplerTiming};

const SUPPORTED_POINTS: [f64; 3] = [4.0, 7.0, 10.0];

pub struct AdcPh<B> {
    sampler: FrameSampler<B>,
    pipeline: Pipeline<OffsetBinaryDecoder, NernstCalibration>,
}

impl<B: I2cBus> AdcPh<B> {
    pub fn new(bus: B, settings: AdcPhSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let calibration = NernstCalibration {
            ph7_mv: settings.ph7_mv,
            ph4_mv: settings.ph4_mv,
            ph10_mv: settings.ph10_mv,
            slope_override: settings.slope_override,
            ref_temp_c: settings.temperature.ref_temp_c,
            output_range: settings.output_range,
        };
        let compensator = TemperatureCompensator::new(settings.temp_comp)
            .with_stale_after(settings.temperature.stale_after);

        let timing = SamplerTiming {
            cache_max_age: settings.acquisition.cache_max_age,
            min_gap: settings.acquisition.min_gap,
            ..SamplerTiming::default()
        };

        Ok(Self {
            sampler: FrameSampler::new(bus, settings.address, timing),
            pipeline: Pipeline::new(
                OffsetBinaryDecoder::new(settings.vref_v),
                calibration,
                settings.temperature.ref_temp_c,
            )
            .with_compensation(compensator, CompensationPoint::Slope),
        })
    }

    pub fn address(&self) -> u8 {
        self.sampler.address()
    }

    /// 電極電位（mV、キャッシュ期間内ならバスに触れない）
    pub fn read_millivolts(&self, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        let fetched = read_offset_binary(&self.sampler, self.pipeline.decoder())?;
        record_sample(&fetched, diag);
        Ok(fetched.sample.value)
    }

    /// 現在の校正値
    pub fn calibration(&self) -> NernstCalibration {
        self.pipeline.calibrator_snapshot()
    }
}

impl<B: I2cBus> AnalogSensor for AdcPh<B> {
    fn name(&self) -> &'static str {
        "adc_ph"
    }

    fn unit(&self) -> Unit {
        Unit::Ph
    }

    fn read(&self) -> Result<Measurement, SensorError> {
        let mut diag = Diagnostics::new();
        let mv = self.read_millivolts(&mut diag)?;
        let ph = self.pipeline.condition(mv, &mut diag)?;
        Ok(Measurement::new(ph, Unit::Ph, diag))
    }

    fn calibrate(&self, points: &[CalibrationPoint]) -> Result<(), SensorError> {
        for point in points {
            let expected = match_expected(point.expected, &SUPPORTED_POINTS, "4, 7, 10")?;
            let observed = match point.observed {
                Some(observed) => observed,
                None => {
                    self.sampler.invalidate();
                    self.read_millivolts(&mut Diagnostics::new())?
                }
            };

            self.pipeline.with_calibrator(|c| {
                if expected == 7.0 {
                    c.ph7_mv = observed;
                } else if expected == 4.0 {
                    c.ph4_mv = Some(observed);
                } else {
                    c.ph10_mv = Some(observed);
                }
            });
            info!(
                "adc ph 0x{:02X}: pH{} anchor {:.3} mV",
                self.address(),
                expected,
                observed
            );
        }
        Ok(())
    }

    fn temperature_sink(&self) -> Option<&dyn TemperatureSink> {
        Some(&self.pipeline)
    }
}
