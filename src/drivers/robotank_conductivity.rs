//! Robo-Tank 導電率ボード（ASCII プロトコル）
//!
//! `U` と `V` の 2 つの電位を読み、その差の絶対値 |U-V| を観測値とします。
//! 純水（fresh）と標準液（standard）での |U-V| を両端として 0〜53,000 µS/cm に
//! 線形に割り付け、必要なら 25℃ 基準へ温度補正します。

use crate::config::{ConfigError, RoboTankConductivitySettings};
use crate::error::SensorError;
use crate::pipeline::{AnalogSensor, CalibrationPoint, Measurement, Pipeline, Unit};
use conditioning_core::{
    AsciiDecoder, CompensationPoint, ConductivityCalibration, Diagnostics, LinearCompensation,
    TemperatureCompensator, TemperatureSink,
};
use log::{debug, info};
use reef_i2c::{AsciiTiming, AsciiTransactor, I2cBus};
use std::time::Duration;

/// 標準液の塩分（ppt）
const REFERENCE_SALINITY_PPT: f64 = 35.0;

/// 応答の読み直し回数（ファームウェアが応答を遅らせることがある）
const PARSE_ATTEMPTS: usize = 6;

const PARSE_BACKOFF: Duration = Duration::from_millis(50);

pub struct RoboTankConductivity<B> {
    transactor: AsciiTransactor<B>,
    pipeline: Pipeline<AsciiDecoder, ConductivityCalibration>,
}

impl<B: I2cBus> RoboTankConductivity<B> {
    pub fn new(bus: B, settings: RoboTankConductivitySettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let calibration = ConductivityCalibration {
            fresh: settings.abs_d_fresh,
            standard: settings.abs_d_standard,
            reference_full_scale: settings.reference_us,
            overshoot_limit: settings.overshoot_limit,
        };
        let compensator = TemperatureCompensator::new(settings.temp_comp)
            .with_stale_after(settings.temperature.stale_after);
        let model = LinearCompensation::new(settings.alpha_per_c, settings.temperature.ref_temp_c);

        let timing = AsciiTiming {
            settle: settings.settle,
            parse_attempts: PARSE_ATTEMPTS,
            parse_backoff: PARSE_BACKOFF,
            drain_before_command: true,
            ..AsciiTiming::default()
        };

        Ok(Self {
            transactor: AsciiTransactor::new(bus, settings.address, timing),
            pipeline: Pipeline::new(AsciiDecoder, calibration, settings.temperature.ref_temp_c)
                .with_compensation(compensator, CompensationPoint::AfterCalibration)
                .with_linear_model(model),
        })
    }

    pub fn address(&self) -> u8 {
        self.transactor.address()
    }

    fn query_potential(&self, command: &str, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        Ok(self
            .transactor
            .query(command, |text| self.pipeline.decode(text, diag))?)
    }

    /// |U-V|（校正前の観測値）
    pub fn read_abs_d(&self, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        let u = self.query_potential("U", diag)?;
        let v = self.query_potential("V", diag)?;
        let abs_d = (u - v).abs();
        debug!("robotank ec 0x{:02X}: U={:.3} V={:.3} |U-V|={:.3}", self.address(), u, v, abs_d);

        diag.record("u", u);
        diag.record("v", v);
        diag.record("abs_d", abs_d);
        Ok(abs_d)
    }

    /// 塩分（ppt）。53,000 µS/cm = 35 ppt として換算します
    pub fn read_salinity(&self) -> Result<Measurement, SensorError> {
        let Measurement {
            value, diagnostics, ..
        } = self.read()?;
        Ok(Measurement::new(self.to_ppt(value), Unit::Ppt, diagnostics))
    }

    /// 水の種類の設定（`W,<n>`）
    pub fn set_water_type(&self, water_type: u8) -> Result<(), SensorError> {
        self.transactor.send(&format!("W,{}", water_type))?;
        info!("robotank ec 0x{:02X}: water type set to {}", self.address(), water_type);
        Ok(())
    }

    /// ファームウェア情報（`H`）
    pub fn firmware(&self) -> Result<String, SensorError> {
        Ok(self.transactor.query_text("H")?)
    }

    /// 現在の校正値（fresh / standard の |U-V|）
    pub fn calibration(&self) -> ConductivityCalibration {
        self.pipeline.calibrator_snapshot()
    }

    fn to_ppt(&self, us: f64) -> f64 {
        let full_scale = self.pipeline.with_calibrator(|c| c.reference_full_scale);
        us * REFERENCE_SALINITY_PPT / full_scale
    }
}

impl<B: I2cBus> AnalogSensor for RoboTankConductivity<B> {
    fn name(&self) -> &'static str {
        "robotank_conductivity"
    }

    fn unit(&self) -> Unit {
        Unit::MicroSiemensPerCm
    }

    fn read(&self) -> Result<Measurement, SensorError> {
        let mut diag = Diagnostics::new();
        let abs_d = self.read_abs_d(&mut diag)?;
        let us = self.pipeline.condition(abs_d, &mut diag)?;
        diag.record("ppt", self.to_ppt(us));
        Ok(Measurement::new(us, Unit::MicroSiemensPerCm, diag))
    }

    /// 基準値 0 は純水、正の値は標準液のアンカーになります
    ///
    /// すべての点を一つの候補に反映してから検証します。等しいアンカーは拒否し、
    /// 未設定のアンカーは `read()` 時に設定エラーとなります。
    fn calibrate(&self, points: &[CalibrationPoint]) -> Result<(), SensorError> {
        let mut updates = Vec::with_capacity(points.len());
        for point in points {
            let is_fresh = point.expected == 0.0;
            if !is_fresh && !(point.expected > 0.0) {
                return Err(SensorError::UnsupportedCalibration {
                    expected: point.expected,
                    supported: "0 (fresh) or the standard solution",
                });
            }

            let observed = match point.observed {
                Some(observed) => observed,
                None => self.read_abs_d(&mut Diagnostics::new())?,
            };
            updates.push((is_fresh, observed));
        }

        self.pipeline.try_update_calibrator(
            |c| {
                for &(is_fresh, observed) in &updates {
                    if is_fresh {
                        c.fresh = observed;
                    } else {
                        c.standard = observed;
                    }
                }
            },
            ConductivityCalibration::check_degenerate,
        )?;

        for (is_fresh, observed) in updates {
            info!(
                "robotank ec 0x{:02X}: {} anchor |U-V|={:.3}",
                self.address(),
                if is_fresh { "fresh" } else { "standard" },
                observed
            );
        }
        Ok(())
    }

    fn temperature_sink(&self) -> Option<&dyn TemperatureSink> {
        Some(&self.pipeline)
    }
}
