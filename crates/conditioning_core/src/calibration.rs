//! 校正エンジン
//!
//! 観測値（デコード済みの物理量）を、オペレーターが与えたアンカー点に基づいて
//! 校正値へ写像します。センサー種別ごとの写像は `Calibrator` を実装します。

use crate::diagnostics::{Diagnostics, Guard};
use log::debug;

/// 2 点の観測値をこれ以下の差で「一致」とみなす
pub const DEGENERATE_EPSILON: f64 = 1e-9;

/// 25℃ における理想ネルンスト傾き（mV/pH、高 pH ほど低 mV）
pub const IDEAL_NERNST_SLOPE_MV: f64 = -59.16;

/// ℃ → K
pub const KELVIN_OFFSET: f64 = 273.15;

/// 校正エラー（ConfigurationError 系）
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("calibration anchor {name} is not set")]
    MissingAnchor { name: &'static str },
    #[error("calibration anchors are degenerate: {first} == {second}")]
    DegenerateAnchors { first: f64, second: f64 },
    #[error("at most {max} calibration anchors are supported, got {got}")]
    TooManyAnchors { max: usize, got: usize },
}

/// 基準量と、その基準で観測された値の組
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub true_value: f64,
    pub observed: f64,
}

impl Anchor {
    pub const fn new(true_value: f64, observed: f64) -> Self {
        Self {
            true_value,
            observed,
        }
    }
}

/// 基準量で一意・昇順に並んだアンカー集合（最大 3 点）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorSet {
    anchors: Vec<Anchor>,
}

impl AnchorSet {
    pub const MAX: usize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_anchors(anchors: impl IntoIterator<Item = Anchor>) -> Result<Self, CalibrationError> {
        let mut set = Self::new();
        for anchor in anchors {
            set.set(anchor)?;
        }
        Ok(set)
    }

    /// 同じ基準量のアンカーは置き換え、なければ挿入します
    pub fn set(&mut self, anchor: Anchor) -> Result<(), CalibrationError> {
        if let Some(existing) = self
            .anchors
            .iter_mut()
            .find(|a| a.true_value == anchor.true_value)
        {
            *existing = anchor;
            return Ok(());
        }

        if self.anchors.len() >= Self::MAX {
            return Err(CalibrationError::TooManyAnchors {
                max: Self::MAX,
                got: self.anchors.len() + 1,
            });
        }

        let index = self
            .anchors
            .iter()
            .position(|a| a.true_value > anchor.true_value)
            .unwrap_or(self.anchors.len());
        self.anchors.insert(index, anchor);
        Ok(())
    }

    pub fn remove(&mut self, true_value: f64) -> Option<Anchor> {
        let index = self.anchors.iter().position(|a| a.true_value == true_value)?;
        Some(self.anchors.remove(index))
    }

    pub fn get(&self, true_value: f64) -> Option<&Anchor> {
        self.anchors.iter().find(|a| a.true_value == true_value)
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }
}

/// 観測値 → 校正値の写像
///
/// `temp_c` は温度補正が有効かつ温度が有効な場合のみ `Some` になります。
/// 温度を使わない写像はこれを無視します。
pub trait Calibrator {
    fn calibrate(
        &self,
        observed: f64,
        temp_c: Option<f64>,
        diag: &mut Diagnostics,
    ) -> Result<f64, CalibrationError>;
}

/// 2 点を通る直線で補間・外挿（端点で厳密一致）
///
/// 観測値が一致する場合は低い側の基準量を返し、ゼロ傾きを記録します。
pub fn two_point(x: f64, low: &Anchor, high: &Anchor, diag: &mut Diagnostics) -> f64 {
    let den = high.observed - low.observed;
    if den.abs() < DEGENERATE_EPSILON {
        diag.guard(Guard::ZeroSlope);
        return low.true_value;
    }

    let t = (x - low.observed) / den;
    if t == 1.0 {
        return high.true_value;
    }
    low.true_value + t * (high.true_value - low.true_value)
}

fn clamp_recorded(value: f64, range: Option<(f64, f64)>) -> (f64, bool) {
    match range {
        Some((min, max)) => {
            let clamped = value.clamp(min, max);
            (clamped, clamped != value)
        }
        None => (value, false),
    }
}

/// 0〜3 点のアンカーによるオフセット / 線形 / 折れ線校正
#[derive(Debug, Clone, Default)]
pub struct PiecewiseCalibration {
    anchors: AnchorSet,
    input_range: Option<(f64, f64)>,
    output_range: Option<(f64, f64)>,
}

impl PiecewiseCalibration {
    pub fn new(anchors: AnchorSet) -> Self {
        Self {
            anchors,
            input_range: None,
            output_range: None,
        }
    }

    /// 校正前に観測値を収める範囲
    pub fn with_input_range(mut self, min: f64, max: f64) -> Self {
        self.input_range = Some((min, max));
        self
    }

    /// センサー種別の有効出力範囲
    pub fn with_output_range(mut self, min: f64, max: f64) -> Self {
        self.output_range = Some((min, max));
        self
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn anchors_mut(&mut self) -> &mut AnchorSet {
        &mut self.anchors
    }
}

impl Calibrator for PiecewiseCalibration {
    fn calibrate(
        &self,
        observed: f64,
        _temp_c: Option<f64>,
        diag: &mut Diagnostics,
    ) -> Result<f64, CalibrationError> {
        let (x, input_clamped) = clamp_recorded(observed, self.input_range);
        if input_clamped {
            diag.guard(Guard::InputClamped {
                raw: observed,
                clamped: x,
            });
        }

        let y = match self.anchors.as_slice() {
            // 未校正: そのまま返す
            [] => return Ok(x),
            [a] => a.true_value + (x - a.observed),
            [low, high] => two_point(x, low, high, diag),
            [low, mid, high] => {
                if x <= mid.observed {
                    two_point(x, low, mid, diag)
                } else {
                    two_point(x, mid, high, diag)
                }
            }
            anchors => {
                return Err(CalibrationError::TooManyAnchors {
                    max: AnchorSet::MAX,
                    got: anchors.len(),
                })
            }
        };
        debug!(
            "piecewise calibration anchors={} x={:.4} y={:.4}",
            self.anchors.len(),
            x,
            y
        );

        let (out, output_clamped) = clamp_recorded(y, self.output_range);
        if output_clamped {
            diag.guard(Guard::OutputClamped { raw: y, clamped: out });
        }
        Ok(out)
    }
}

/// 導電率用 2 点写像: |ΔmV| を fresh(0) 〜 standard(フルスケール) に線形に割り付ける
#[derive(Debug, Clone, Copy)]
pub struct ConductivityCalibration {
    /// 純水（RO/DI）での観測値。0 以下は未設定
    pub fresh: f64,
    /// 標準液での観測値。0 以下は未設定
    pub standard: f64,
    /// 標準液の基準値（µS/cm @ 25℃）
    pub reference_full_scale: f64,
    /// 比率の上限（フルスケール付近のノイズによるオーバーシュートを許容）
    pub overshoot_limit: f64,
}

impl ConductivityCalibration {
    pub const DEFAULT_FULL_SCALE_US: f64 = 53_000.0;
    pub const DEFAULT_OVERSHOOT_LIMIT: f64 = 1.2;

    pub fn new(fresh: f64, standard: f64) -> Self {
        Self {
            fresh,
            standard,
            reference_full_scale: Self::DEFAULT_FULL_SCALE_US,
            overshoot_limit: Self::DEFAULT_OVERSHOOT_LIMIT,
        }
    }

    /// 校正入力の検証: 両アンカーが設定済みで等しい場合のみ拒否します
    ///
    /// 片方が未設定のままの状態は許容し、`calibrate` 時に `MissingAnchor` になります。
    pub fn check_degenerate(&self) -> Result<(), CalibrationError> {
        if self.fresh > 0.0
            && self.standard > 0.0
            && (self.fresh - self.standard).abs() < DEGENERATE_EPSILON
        {
            return Err(CalibrationError::DegenerateAnchors {
                first: self.fresh,
                second: self.standard,
            });
        }
        Ok(())
    }

    /// 両アンカーが設定済みかつ異なる値か検証します
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(self.fresh > 0.0) {
            return Err(CalibrationError::MissingAnchor { name: "fresh" });
        }
        if !(self.standard > 0.0) {
            return Err(CalibrationError::MissingAnchor { name: "standard" });
        }
        if (self.fresh - self.standard).abs() < DEGENERATE_EPSILON {
            return Err(CalibrationError::DegenerateAnchors {
                first: self.fresh,
                second: self.standard,
            });
        }
        Ok(())
    }
}

impl Calibrator for ConductivityCalibration {
    fn calibrate(
        &self,
        observed: f64,
        _temp_c: Option<f64>,
        diag: &mut Diagnostics,
    ) -> Result<f64, CalibrationError> {
        self.validate()?;

        let ratio = (self.fresh - observed) / (self.fresh - self.standard);
        let clamped = ratio.clamp(0.0, self.overshoot_limit);
        if clamped != ratio {
            diag.guard(Guard::RatioClamped {
                raw: ratio,
                clamped,
            });
        }
        diag.record("ratio", clamped);

        Ok(clamped * self.reference_full_scale)
    }
}

/// ネルンスト傾きの採用元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeSource {
    Override,
    Ph4Pair,
    Ph10Pair,
    Ideal,
}

/// mV → pH（`pH = 7 + (mV - mV7) / slope`）
#[derive(Debug, Clone, Copy)]
pub struct NernstCalibration {
    /// pH7 での観測 mV
    pub ph7_mv: f64,
    pub ph4_mv: Option<f64>,
    pub ph10_mv: Option<f64>,
    /// 基準温度での傾き（mV/pH）の明示指定
    pub slope_override: Option<f64>,
    pub ref_temp_c: f64,
    pub output_range: (f64, f64),
}

impl Default for NernstCalibration {
    fn default() -> Self {
        Self {
            ph7_mv: 0.0,
            ph4_mv: None,
            ph10_mv: None,
            slope_override: None,
            ref_temp_c: 25.0,
            output_range: (0.0, 14.0),
        }
    }
}

impl NernstCalibration {
    /// 基準温度での傾きを優先順位（明示指定 → pH4/7 → pH10/7 → 理想値）で選びます
    pub fn reference_slope(&self) -> (f64, SlopeSource) {
        if let Some(slope) = self.slope_override.filter(|s| *s != 0.0) {
            return (slope, SlopeSource::Override);
        }
        if let Some(ph4) = self.ph4_mv {
            return ((ph4 - self.ph7_mv) / (4.0 - 7.0), SlopeSource::Ph4Pair);
        }
        if let Some(ph10) = self.ph10_mv {
            return ((ph10 - self.ph7_mv) / (10.0 - 7.0), SlopeSource::Ph10Pair);
        }
        (IDEAL_NERNST_SLOPE_MV, SlopeSource::Ideal)
    }

    /// 絶対温度比で傾きをスケーリング（温度が無い、または非物理的なら基準傾き）
    pub fn slope_at(&self, reference_slope: f64, temp_c: Option<f64>) -> f64 {
        let Some(temp_c) = temp_c else {
            return reference_slope;
        };
        let tk = temp_c + KELVIN_OFFSET;
        if !(tk > 0.0) {
            return reference_slope;
        }
        reference_slope * (tk / (self.ref_temp_c + KELVIN_OFFSET))
    }
}

impl Calibrator for NernstCalibration {
    fn calibrate(
        &self,
        observed: f64,
        temp_c: Option<f64>,
        diag: &mut Diagnostics,
    ) -> Result<f64, CalibrationError> {
        let (reference, source) = self.reference_slope();
        let mut slope = self.slope_at(reference, temp_c);
        if slope == 0.0 || !slope.is_finite() {
            diag.guard(Guard::SlopeFallback);
            slope = IDEAL_NERNST_SLOPE_MV;
        }
        debug!(
            "nernst slope source={:?} ref={:.4} used={:.4} temp={:?}",
            source, reference, slope, temp_c
        );
        diag.record("slope_used", slope);

        let ph = 7.0 + (observed - self.ph7_mv) / slope;
        let (min, max) = self.output_range;
        let clamped = ph.clamp(min, max);
        if clamped != ph {
            diag.guard(Guard::OutputClamped {
                raw: ph,
                clamped,
            });
        }
        Ok(clamped)
    }
}

/// `y = gain * x + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCalibration {
    pub gain: f64,
    pub offset: f64,
}

impl Default for LinearCalibration {
    fn default() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
        }
    }
}

impl Calibrator for LinearCalibration {
    fn calibrate(
        &self,
        observed: f64,
        _temp_c: Option<f64>,
        _diag: &mut Diagnostics,
    ) -> Result<f64, CalibrationError> {
        Ok(self.gain * observed + self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piecewise(anchors: &[(f64, f64)]) -> PiecewiseCalibration {
        let set = AnchorSet::from_anchors(anchors.iter().map(|&(t, o)| Anchor::new(t, o))).unwrap();
        PiecewiseCalibration::new(set)
    }

    fn run(cal: &impl Calibrator, x: f64) -> (f64, Diagnostics) {
        let mut diag = Diagnostics::new();
        let y = cal.calibrate(x, None, &mut diag).unwrap();
        (y, diag)
    }

    #[test]
    fn test_anchor_set_sorted_and_unique() {
        let mut set = AnchorSet::new();
        set.set(Anchor::new(10.0, 9.8)).unwrap();
        set.set(Anchor::new(4.0, 4.1)).unwrap();
        set.set(Anchor::new(7.0, 7.2)).unwrap();
        set.set(Anchor::new(7.0, 6.9)).unwrap();

        let trues: Vec<f64> = set.as_slice().iter().map(|a| a.true_value).collect();
        assert_eq!(trues, vec![4.0, 7.0, 10.0]);
        assert_eq!(set.get(7.0).map(|a| a.observed), Some(6.9));
        assert_eq!(
            set.set(Anchor::new(12.0, 12.0)),
            Err(CalibrationError::TooManyAnchors { max: 3, got: 4 })
        );
    }

    #[test]
    fn test_zero_anchors_is_identity() {
        let cal = piecewise(&[]).with_output_range(0.0, 14.0);
        assert_eq!(run(&cal, 17.25).0, 17.25);
    }

    #[test]
    fn test_one_point_exact_at_anchor() {
        for (t, o) in [(7.0, 6.83), (4.0, 4.0), (10.0, 10.37), (0.1, 0.3)] {
            let cal = piecewise(&[(t, o)]);
            assert_eq!(run(&cal, o).0, t);
        }
        let cal = piecewise(&[(7.0, 6.5)]);
        assert!((run(&cal, 8.0).0 - 8.5).abs() < 1e-12);
    }

    #[test]
    fn test_two_point_exact_and_monotonic() {
        let (x1, y1, x2, y2) = (4.13, 4.0, 6.91, 7.0);
        let cal = piecewise(&[(y1, x1), (y2, x2)]);
        assert_eq!(run(&cal, x1).0, y1);
        assert_eq!(run(&cal, x2).0, y2);

        let mut last = f64::MIN;
        for i in 0..=20 {
            let x = x1 + (x2 - x1) * f64::from(i) / 20.0;
            let y = run(&cal, x).0;
            assert!(y >= last);
            last = y;
        }
    }

    #[test]
    fn test_two_point_degenerate_returns_lower_true() {
        let cal = piecewise(&[(4.0, 5.5), (7.0, 5.5)]);
        let (y, diag) = run(&cal, 9.0);
        assert_eq!(y, 4.0);
        assert!(diag.has_guard(|g| matches!(g, Guard::ZeroSlope)));
    }

    #[test]
    fn test_three_point_segment_by_observed_middle() {
        // 中点アンカーの観測値 6.0（基準量 7 ではない）で区間を切り替える
        let cal = piecewise(&[(4.0, 4.0), (7.0, 6.0), (10.0, 12.0)]);
        // 低区間: 傾き 1.5
        assert!((run(&cal, 5.0).0 - 5.5).abs() < 1e-12);
        assert_eq!(run(&cal, 6.0).0, 7.0);
        // 高区間: 傾き 0.5
        assert!((run(&cal, 6.5).0 - 7.25).abs() < 1e-12);
        // 6.5 は基準量 7 より下だが、観測中点より上なので高区間
        let low_segment_value = 4.0 + (6.5 - 4.0) * 1.5;
        assert!((run(&cal, 6.5).0 - low_segment_value).abs() > 0.1);
    }

    #[test]
    fn test_output_clamp_is_recorded() {
        let cal = piecewise(&[(7.0, 7.0)]).with_output_range(0.0, 14.0);
        let (y, diag) = run(&cal, 15.0);
        assert_eq!(y, 14.0);
        assert!(diag.has_guard(|g| matches!(g, Guard::OutputClamped { .. })));
    }

    #[test]
    fn test_input_clamp_is_recorded() {
        let cal = piecewise(&[]).with_input_range(-1.0, 15.0);
        let (y, diag) = run(&cal, -3.0);
        assert_eq!(y, -1.0);
        assert!(diag.has_guard(|g| matches!(g, Guard::InputClamped { .. })));
    }

    #[test]
    fn test_conductivity_full_scale_and_overshoot() {
        let cal = ConductivityCalibration::new(1000.0, 20.0);
        assert_eq!(run(&cal, 20.0).0, 53_000.0);
        assert_eq!(run(&cal, 1000.0).0, 0.0);

        let (us, diag) = run(&cal, -500.0);
        assert!((us - 63_600.0).abs() < 1e-6);
        assert!(diag.has_guard(|g| matches!(g, Guard::RatioClamped { .. })));
    }

    #[test]
    fn test_conductivity_rejects_bad_anchors() {
        let mut diag = Diagnostics::new();
        assert_eq!(
            ConductivityCalibration::new(0.0, 20.0).calibrate(10.0, None, &mut diag),
            Err(CalibrationError::MissingAnchor { name: "fresh" })
        );
        assert_eq!(
            ConductivityCalibration::new(1000.0, -1.0).calibrate(10.0, None, &mut diag),
            Err(CalibrationError::MissingAnchor { name: "standard" })
        );
        assert!(matches!(
            ConductivityCalibration::new(24.0, 24.0).calibrate(10.0, None, &mut diag),
            Err(CalibrationError::DegenerateAnchors { .. })
        ));
    }

    #[test]
    fn test_conductivity_check_degenerate_allows_unset() {
        assert_eq!(ConductivityCalibration::new(0.0, 0.0).check_degenerate(), Ok(()));
        assert_eq!(ConductivityCalibration::new(1000.0, 0.0).check_degenerate(), Ok(()));
        assert!(matches!(
            ConductivityCalibration::new(24.0, 24.0).check_degenerate(),
            Err(CalibrationError::DegenerateAnchors { .. })
        ));
    }

    #[test]
    fn test_nernst_slope_priority() {
        let mut cal = NernstCalibration {
            ph7_mv: 0.0,
            ph4_mv: Some(180.0),
            ph10_mv: Some(-150.0),
            slope_override: Some(-57.0),
            ..NernstCalibration::default()
        };
        assert_eq!(cal.reference_slope(), (-57.0, SlopeSource::Override));
        cal.slope_override = Some(0.0);
        assert_eq!(cal.reference_slope(), (-60.0, SlopeSource::Ph4Pair));
        cal.ph4_mv = None;
        assert_eq!(cal.reference_slope(), (-50.0, SlopeSource::Ph10Pair));
        cal.ph10_mv = None;
        assert_eq!(cal.reference_slope(), (IDEAL_NERNST_SLOPE_MV, SlopeSource::Ideal));
    }

    #[test]
    fn test_nernst_anchor_points() {
        let cal = NernstCalibration {
            ph7_mv: 0.0,
            ph4_mv: Some(180.0),
            ..NernstCalibration::default()
        };
        assert_eq!(run(&cal, 0.0).0, 7.0);
        assert_eq!(run(&cal, 180.0).0, 4.0);
    }

    #[test]
    fn test_nernst_temperature_scaling() {
        let cal = NernstCalibration::default();
        let mut diag = Diagnostics::new();
        cal.calibrate(0.0, Some(35.0), &mut diag).unwrap();
        let expected = IDEAL_NERNST_SLOPE_MV * (35.0 + KELVIN_OFFSET) / (25.0 + KELVIN_OFFSET);
        assert!((diag.signal("slope_used").unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_nernst_zero_slope_falls_back() {
        let cal = NernstCalibration {
            ph7_mv: 10.0,
            ph4_mv: Some(10.0),
            ..NernstCalibration::default()
        };
        let (ph, diag) = run(&cal, 10.0);
        assert_eq!(ph, 7.0);
        assert!(diag.has_guard(|g| matches!(g, Guard::SlopeFallback)));
    }

    #[test]
    fn test_linear_calibration() {
        let cal = LinearCalibration {
            gain: 500.0,
            offset: -3.0,
        };
        assert_eq!(run(&cal, 1.0).0, 497.0);
    }
}
