//! 汎用測定パイプライン
//!
//! デコード → 校正 → 温度補正 を、差し替え可能な `Decoder` と `Calibrator` で組み立てます。
//! バス取得はドライバ側（`reef_i2c` のトランザクタ）が担当します。

use crate::error::SensorError;
use conditioning_core::{
    CalibrationError, Calibrator, CompensationPoint, DecodeError, Decoder, Diagnostics,
    LinearCompensation, TemperatureCompensator, TemperatureSink, TemperatureState,
};
use log::debug;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// 測定値の単位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Ph,
    MicroSiemensPerCm,
    Ppt,
    Millivolts,
    Ppm,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Ph => "pH",
            Unit::MicroSiemensPerCm => "µS/cm",
            Unit::Ppt => "ppt",
            Unit::Millivolts => "mV",
            Unit::Ppm => "ppm",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 校正済みの測定値と診断情報
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub unit: Unit,
    pub diagnostics: Diagnostics,
}

impl Measurement {
    pub fn new(value: f64, unit: Unit, diagnostics: Diagnostics) -> Self {
        Self {
            value,
            unit,
            diagnostics,
        }
    }

    pub fn signal(&self, key: &str) -> Option<f64> {
        self.diagnostics.signal(key)
    }
}

/// オペレーターが入力する校正点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    /// 基準液の値（pH 4 / 7 / 10、導電率 0 / 標準液 など）
    pub expected: f64,
    /// その基準液での観測値。`None` ならその場で読み取る
    pub observed: Option<f64>,
}

impl CalibrationPoint {
    /// 観測値 0 は「今の値を読む」を表します
    pub fn new(expected: f64, observed: f64) -> Self {
        Self {
            expected,
            observed: (observed != 0.0).then_some(observed),
        }
    }

    pub fn live(expected: f64) -> Self {
        Self {
            expected,
            observed: None,
        }
    }
}

/// デコーダ・校正器・温度補正を束ねた処理系
pub struct Pipeline<D, C> {
    decoder: D,
    calibrator: Mutex<C>,
    compensator: TemperatureCompensator,
    point: CompensationPoint,
    model: Option<LinearCompensation>,
    temperature: Mutex<TemperatureState>,
}

impl<D: Decoder, C: Calibrator> Pipeline<D, C> {
    /// 温度補正なしのパイプライン
    pub fn new(decoder: D, calibrator: C, ref_temp_c: f64) -> Self {
        Self {
            decoder,
            calibrator: Mutex::new(calibrator),
            compensator: TemperatureCompensator::default(),
            point: CompensationPoint::Slope,
            model: None,
            temperature: Mutex::new(TemperatureState::new(ref_temp_c)),
        }
    }

    pub fn with_compensation(
        mut self,
        compensator: TemperatureCompensator,
        point: CompensationPoint,
    ) -> Self {
        self.compensator = compensator;
        self.point = point;
        self
    }

    /// `BeforeCalibration` / `AfterCalibration` で使う線形モデル
    pub fn with_linear_model(mut self, model: LinearCompensation) -> Self {
        self.model = Some(model);
        self
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn compensation_point(&self) -> CompensationPoint {
        self.point
    }

    pub fn decode(&self, raw: &D::Raw, diag: &mut Diagnostics) -> Result<f64, DecodeError> {
        self.decoder.decode(raw, diag)
    }

    /// 観測値を校正し、設定に応じて温度補正します
    pub fn condition(&self, observed: f64, diag: &mut Diagnostics) -> Result<f64, CalibrationError> {
        diag.record("observed", observed);
        let temp_c = self.usable_temperature(diag);

        let calibrator = self.calibrator.lock().unwrap_or_else(PoisonError::into_inner);
        let value = match self.point {
            CompensationPoint::BeforeCalibration => {
                let normalized = self.normalize(observed, temp_c, diag);
                diag.record("observed_ref", normalized);
                calibrator.calibrate(normalized, None, diag)?
            }
            CompensationPoint::AfterCalibration => {
                let calibrated = calibrator.calibrate(observed, None, diag)?;
                diag.record("calibrated_at_temp", calibrated);
                self.normalize(calibrated, temp_c, diag)
            }
            CompensationPoint::Slope => calibrator.calibrate(observed, temp_c, diag)?,
        };
        debug!(
            "pipeline point={:?} observed={:.4} temp={:?} value={:.4}",
            self.point, observed, temp_c, value
        );

        diag.record("calibrated", value);
        Ok(value)
    }

    /// 生データのデコードから補正までを一度に行います
    pub fn process(&self, raw: &D::Raw, diag: &mut Diagnostics) -> Result<f64, SensorError> {
        let observed = self.decode(raw, diag)?;
        Ok(self.condition(observed, diag)?)
    }

    /// 校正器を変更します
    pub fn with_calibrator<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut calibrator = self.calibrator.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut calibrator)
    }

    /// 候補の校正器を検証してから差し替えます（失敗時は元のまま）
    pub fn try_update_calibrator(
        &self,
        update: impl FnOnce(&mut C),
        validate: impl FnOnce(&C) -> Result<(), CalibrationError>,
    ) -> Result<(), CalibrationError>
    where
        C: Clone,
    {
        let mut calibrator = self.calibrator.lock().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = calibrator.clone();
        update(&mut candidate);
        validate(&candidate)?;
        *calibrator = candidate;
        Ok(())
    }

    pub fn calibrator_snapshot(&self) -> C
    where
        C: Clone,
    {
        self.calibrator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 現在の温度状態（コピー）
    pub fn temperature(&self) -> TemperatureState {
        *self.temperature.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn usable_temperature(&self, diag: &mut Diagnostics) -> Option<f64> {
        let mut state = self.temperature.lock().unwrap_or_else(PoisonError::into_inner);
        self.compensator
            .usable_temperature(&mut state, Instant::now(), diag)
    }

    fn normalize(&self, value: f64, temp_c: Option<f64>, diag: &mut Diagnostics) -> f64 {
        match (temp_c, &self.model) {
            (Some(temp_c), Some(model)) => model.normalize(value, temp_c, diag),
            _ => value,
        }
    }
}

impl<D: Decoder, C: Calibrator> TemperatureSink for Pipeline<D, C> {
    fn set_temperature_c(&self, temp_c: f64) {
        self.temperature.set_temperature_c(temp_c);
    }
}

/// 各センサードライバの共通インターフェース
pub trait AnalogSensor: Send + Sync {
    fn name(&self) -> &'static str;

    fn unit(&self) -> Unit;

    /// 測定値を取得します
    fn read(&self) -> Result<Measurement, SensorError>;

    /// 校正点を適用します（メモリ上のみ）
    fn calibrate(&self, points: &[CalibrationPoint]) -> Result<(), SensorError>;

    /// 温度注入に対応するデバイスのみ `Some` を返します
    fn temperature_sink(&self) -> Option<&dyn TemperatureSink> {
        None
    }
}
