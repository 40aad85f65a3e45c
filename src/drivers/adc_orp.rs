//! AliExpress ORP モジュール（pH モジュールと同じ 3 バイト ADC）
//!
//! 出力は電極電位（mV）にオフセットを加えた値です。温度は使いません。

use crate::config::{AdcOrpSettings, ConfigError};
use crate::drivers::{read_offset_binary, record_sample};
use crate::error::SensorError;
use crate::pipeline::{AnalogSensor, CalibrationPoint, Measurement, Pipeline, Unit};
use conditioning_core::{Anchor, AnchorSet, Diagnostics, OffsetBinaryDecoder, PiecewiseCalibration};
use log::{debug, info};
use reef_i2c::{FrameSampler, I2cBus, SamplerTiming};

pub struct AdcOrp<B> {
    sampler: FrameSampler<B>,
    pipeline: Pipeline<OffsetBinaryDecoder, PiecewiseCalibration>,
}

impl<B: I2cBus> AdcOrp<B> {
    pub fn new(bus: B, settings: AdcOrpSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        // オフセットは 0 mV を offset_mv に写す 1 点アンカー
        let anchors = AnchorSet::from_anchors([Anchor::new(settings.offset_mv, 0.0)])?;
        let timing = SamplerTiming {
            cache_max_age: settings.acquisition.cache_max_age,
            min_gap: settings.acquisition.min_gap,
            ..SamplerTiming::default()
        };

        Ok(Self {
            sampler: FrameSampler::new(bus, settings.address, timing),
            pipeline: Pipeline::new(
                OffsetBinaryDecoder::new(settings.vref_v),
                PiecewiseCalibration::new(anchors),
                25.0,
            ),
        })
    }

    pub fn address(&self) -> u8 {
        self.sampler.address()
    }

    pub fn read_millivolts(&self, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        let fetched = read_offset_binary(&self.sampler, self.pipeline.decoder())?;
        record_sample(&fetched, diag);
        Ok(fetched.sample.value)
    }

    /// 現在のオフセット（mV）
    pub fn offset_mv(&self) -> f64 {
        self.pipeline.with_calibrator(|c| {
            c.anchors()
                .as_slice()
                .first()
                .map_or(0.0, |a| a.true_value - a.observed)
        })
    }

    /// 温度注入は受け付けるが使わない
    pub fn set_temperature_c(&self, temp_c: f64) {
        debug!("adc orp 0x{:02X}: ignoring temperature {:.2}C", self.address(), temp_c);
    }
}

impl<B: I2cBus> AnalogSensor for AdcOrp<B> {
    fn name(&self) -> &'static str {
        "adc_orp"
    }

    fn unit(&self) -> Unit {
        Unit::Millivolts
    }

    fn read(&self) -> Result<Measurement, SensorError> {
        let mut diag = Diagnostics::new();
        let mv = self.read_millivolts(&mut diag)?;
        let value = self.pipeline.condition(mv, &mut diag)?;
        diag.record("offset_mv", self.offset_mv());
        Ok(Measurement::new(value, Unit::Millivolts, diag))
    }

    /// 任意の基準値を 1 点で合わせます（最後の点が有効）
    fn calibrate(&self, points: &[CalibrationPoint]) -> Result<(), SensorError> {
        for point in points {
            if !point.expected.is_finite() {
                return Err(SensorError::UnsupportedCalibration {
                    expected: point.expected,
                    supported: "any finite mV",
                });
            }
            let observed = match point.observed {
                Some(observed) => observed,
                None => {
                    self.sampler.invalidate();
                    self.read_millivolts(&mut Diagnostics::new())?
                }
            };

            self.pipeline.with_calibrator(|c| {
                let anchors = c.anchors_mut();
                anchors.clear();
                anchors.set(Anchor::new(point.expected, observed))
            })?;
            info!(
                "adc orp 0x{:02X}: offset {:.3} mV (expected {:.3}, observed {:.3})",
                self.address(),
                point.expected - observed,
                point.expected,
                observed
            );
        }
        Ok(())
    }
}
