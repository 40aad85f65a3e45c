//! Robo-Tank pH ボード（ASCII プロトコル）
//!
//! `R` コマンドでボードが計算した pH を読み、オペレーターのアンカー
//! （pH 4 / 7 / 10 の観測値）で 0〜3 点校正します。

use crate::config::{ConfigError, RoboTankPhSettings};
use crate::drivers::match_expected;
use crate::error::SensorError;
use crate::pipeline::{AnalogSensor, CalibrationPoint, Measurement, Pipeline, Unit};
use conditioning_core::{Anchor, AnchorSet, AsciiDecoder, Diagnostics, PiecewiseCalibration};
use log::info;
use reef_i2c::{AsciiTiming, AsciiTransactor, I2cBus};

/// 25℃ での理想ネルンスト傾き（診断用の mV 換算）
const IMPLIED_MV_PER_PH: f64 = 59.16;

const SUPPORTED_POINTS: [f64; 3] = [4.0, 7.0, 10.0];

pub struct RoboTankPh<B> {
    transactor: AsciiTransactor<B>,
    pipeline: Pipeline<AsciiDecoder, PiecewiseCalibration>,
}

impl<B: I2cBus> RoboTankPh<B> {
    pub fn new(bus: B, settings: RoboTankPhSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let anchors = AnchorSet::from_anchors(
            [(4.0, settings.obs4), (7.0, settings.obs7), (10.0, settings.obs10)]
                .into_iter()
                .filter_map(|(true_value, observed)| {
                    observed.map(|observed| Anchor::new(true_value, observed))
                }),
        )?;
        let (raw_min, raw_max) = settings.raw_range;
        let (out_min, out_max) = settings.output_range;
        let calibration = PiecewiseCalibration::new(anchors)
            .with_input_range(raw_min, raw_max)
            .with_output_range(out_min, out_max);

        let timing = AsciiTiming {
            settle: settings.settle,
            ..AsciiTiming::default()
        };

        Ok(Self {
            transactor: AsciiTransactor::new(bus, settings.address, timing),
            pipeline: Pipeline::new(AsciiDecoder, calibration, 25.0),
        })
    }

    pub fn address(&self) -> u8 {
        self.transactor.address()
    }

    /// ボードが返す校正前の pH
    pub fn read_raw(&self, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        let raw = self
            .transactor
            .query("R", |text| self.pipeline.decode(text, diag))?;
        diag.record("raw_ph", raw);
        diag.record("implied_mv", (7.0 - raw) * IMPLIED_MV_PER_PH);
        Ok(raw)
    }

    /// ファームウェア情報（`H`）
    pub fn firmware(&self) -> Result<String, SensorError> {
        Ok(self.transactor.query_text("H")?)
    }

    /// 現在のアンカー
    pub fn anchors(&self) -> AnchorSet {
        self.pipeline.with_calibrator(|c| c.anchors().clone())
    }

    pub fn clear_calibration(&self) {
        self.pipeline.with_calibrator(|c| c.anchors_mut().clear());
        info!("robotank ph 0x{:02X}: calibration cleared", self.address());
    }
}

impl<B: I2cBus> AnalogSensor for RoboTankPh<B> {
    fn name(&self) -> &'static str {
        "robotank_ph"
    }

    fn unit(&self) -> Unit {
        Unit::Ph
    }

    fn read(&self) -> Result<Measurement, SensorError> {
        let mut diag = Diagnostics::new();
        let raw = self.read_raw(&mut diag)?;
        let value = self.pipeline.condition(raw, &mut diag)?;
        Ok(Measurement::new(value, Unit::Ph, diag))
    }

    fn calibrate(&self, points: &[CalibrationPoint]) -> Result<(), SensorError> {
        for point in points {
            let expected = match_expected(point.expected, &SUPPORTED_POINTS, "4, 7, 10")?;
            let observed = match point.observed {
                Some(observed) => observed,
                None => self.read_raw(&mut Diagnostics::new())?,
            };

            self.pipeline
                .with_calibrator(|c| c.anchors_mut().set(Anchor::new(expected, observed)))?;
            info!(
                "robotank ph 0x{:02X}: anchor pH{} observed={:.3}",
                self.address(),
                expected,
                observed
            );
        }
        Ok(())
    }
}
