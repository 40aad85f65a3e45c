//! 温度補正
//!
//! 外部から注入される水温を追跡し、設定で有効かつ温度が新しい場合に限り
//! 測定値を基準温度へ正規化します。それ以外は何もしません（診断に記録）。

use crate::diagnostics::{Diagnostics, Guard};
use log::{debug, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 温度注入がこれより古いと無効扱い
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// 補正式の分母の下限
pub const DEFAULT_MIN_DENOMINATOR: f64 = 0.1;

/// 注入された温度の状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureState {
    current_c: f64,
    last_updated_at: Option<Instant>,
    valid: bool,
    ref_temp_c: f64,
}

impl TemperatureState {
    /// 未注入状態（基準温度を仮定、無効）
    pub fn new(ref_temp_c: f64) -> Self {
        Self {
            current_c: ref_temp_c,
            last_updated_at: None,
            valid: false,
            ref_temp_c,
        }
    }

    /// 負の値または非数は「不明」を表す番兵値
    pub fn is_sentinel(temp_c: f64) -> bool {
        !temp_c.is_finite() || temp_c < 0.0
    }

    pub fn inject(&mut self, temp_c: f64, now: Instant) {
        self.last_updated_at = Some(now);

        if Self::is_sentinel(temp_c) {
            debug!(
                "temperature sentinel {:.2} -> assuming {:.2}C (no compensation)",
                temp_c, self.ref_temp_c
            );
            self.current_c = self.ref_temp_c;
            self.valid = false;
            return;
        }

        debug!("temperature {:.2}C -> {:.2}C", self.current_c, temp_c);
        self.current_c = temp_c;
        self.valid = true;
    }

    pub fn current_c(&self) -> f64 {
        self.current_c
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_updated_at(&self) -> Option<Instant> {
        self.last_updated_at
    }

    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_updated_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// 古くなった温度を無効へ落とす（基準温度を仮定）
    pub fn downgrade(&mut self) {
        self.valid = false;
        self.current_c = self.ref_temp_c;
    }
}

/// 外部からの温度注入を受け付ける能力
///
/// 温度補正が意味を持つデバイスだけが実装します。
pub trait TemperatureSink {
    fn set_temperature_c(&self, temp_c: f64);
}

impl TemperatureSink for Mutex<TemperatureState> {
    fn set_temperature_c(&self, temp_c: f64) {
        let mut state = self.lock().unwrap_or_else(|e| e.into_inner());
        state.inject(temp_c, Instant::now());
    }
}

/// パイプラインのどこで温度を使うか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationPoint {
    /// 校正前に観測値を正規化（TDS）
    BeforeCalibration,
    /// 校正後の値を正規化（導電率）
    AfterCalibration,
    /// 値は正規化せず、校正器に温度を渡す（ネルンスト傾き）
    Slope,
}

/// 線形モデル: `value_ref = value / (1 + alpha * (t - t_ref))`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCompensation {
    pub alpha_per_c: f64,
    pub ref_temp_c: f64,
    pub min_denominator: f64,
}

impl LinearCompensation {
    pub fn new(alpha_per_c: f64, ref_temp_c: f64) -> Self {
        Self {
            alpha_per_c,
            ref_temp_c,
            min_denominator: DEFAULT_MIN_DENOMINATOR,
        }
    }

    fn denominator(&self, temp_c: f64) -> (f64, f64) {
        let raw = 1.0 + self.alpha_per_c * (temp_c - self.ref_temp_c);
        if raw <= self.min_denominator {
            (raw, self.min_denominator)
        } else {
            (raw, raw)
        }
    }

    /// 測定温度の値 → 基準温度の値
    pub fn normalize(&self, value: f64, temp_c: f64, diag: &mut Diagnostics) -> f64 {
        let (raw, den) = self.denominator(temp_c);
        if den != raw {
            diag.guard(Guard::DenominatorClamped {
                raw,
                floor: self.min_denominator,
            });
        }
        value / den
    }

    /// 基準温度の値 → 測定温度の値（`normalize` の逆）
    pub fn denormalize(&self, value_ref: f64, temp_c: f64) -> f64 {
        let (_, den) = self.denominator(temp_c);
        value_ref * den
    }
}

/// 温度補正を適用してよいかを判定し、使える温度を返す
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureCompensator {
    pub enabled: bool,
    pub stale_after: Duration,
}

impl Default for TemperatureCompensator {
    fn default() -> Self {
        Self {
            enabled: false,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl TemperatureCompensator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// 補正に使える温度。無効・未注入・古い場合は `None`（理由は診断へ）
    ///
    /// 古い注入を検出した場合は状態自体も無効へ落とします。
    pub fn usable_temperature(
        &self,
        state: &mut TemperatureState,
        now: Instant,
        diag: &mut Diagnostics,
    ) -> Option<f64> {
        if !self.enabled {
            diag.guard(Guard::CompensationDisabled);
            return None;
        }
        if !state.is_valid() {
            diag.guard(Guard::TemperatureMissing);
            return None;
        }

        let age = state.age(now).unwrap_or_default();
        if age > self.stale_after {
            warn!(
                "temperature is stale (age {:?} > {:?}); skipping compensation",
                age, self.stale_after
            );
            state.downgrade();
            diag.guard(Guard::TemperatureStale { age });
            return None;
        }

        let temp_c = state.current_c();
        diag.record("temp_c", temp_c);
        Some(temp_c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize_if_usable(
        comp: &TemperatureCompensator,
        state: &mut TemperatureState,
        now: Instant,
        value: f64,
    ) -> (f64, Diagnostics) {
        let model = LinearCompensation::new(0.02, 25.0);
        let mut diag = Diagnostics::new();
        let out = match comp.usable_temperature(state, now, &mut diag) {
            Some(t) => model.normalize(value, t, &mut diag),
            None => value,
        };
        (out, diag)
    }

    #[test]
    fn test_noop_when_disabled() {
        let now = Instant::now();
        let mut state = TemperatureState::new(25.0);
        state.inject(30.0, now);
        let (out, diag) = normalize_if_usable(&TemperatureCompensator::new(false), &mut state, now, 412.5);
        assert_eq!(out, 412.5);
        assert!(diag.has_guard(|g| matches!(g, Guard::CompensationDisabled)));
    }

    #[test]
    fn test_noop_when_never_injected() {
        let mut state = TemperatureState::new(25.0);
        let (out, diag) =
            normalize_if_usable(&TemperatureCompensator::new(true), &mut state, Instant::now(), 412.5);
        assert_eq!(out, 412.5);
        assert!(diag.has_guard(|g| matches!(g, Guard::TemperatureMissing)));
    }

    #[test]
    fn test_noop_when_stale_and_state_downgraded() {
        let injected = Instant::now();
        let mut state = TemperatureState::new(25.0);
        state.inject(28.0, injected);
        assert!(state.is_valid());

        let later = injected + Duration::from_secs(121);
        let (out, diag) = normalize_if_usable(&TemperatureCompensator::new(true), &mut state, later, 412.5);
        assert_eq!(out, 412.5);
        assert!(diag.has_guard(|g| matches!(g, Guard::TemperatureStale { .. })));
        assert!(!state.is_valid());
        assert_eq!(state.current_c(), 25.0);
    }

    #[test]
    fn test_fresh_temperature_is_applied() {
        let now = Instant::now();
        let mut state = TemperatureState::new(25.0);
        state.inject(30.0, now);
        let (out, diag) = normalize_if_usable(
            &TemperatureCompensator::new(true),
            &mut state,
            now + Duration::from_secs(60),
            110.0,
        );
        assert!((out - 100.0).abs() < 1e-9);
        assert_eq!(diag.signal("temp_c"), Some(30.0));
    }

    #[test]
    fn test_sentinel_invalidates() {
        let now = Instant::now();
        let mut state = TemperatureState::new(25.0);
        state.inject(26.5, now);
        state.inject(-1.0, now);
        assert!(!state.is_valid());
        assert_eq!(state.current_c(), 25.0);

        state.inject(f64::NAN, now);
        assert!(!state.is_valid());
    }

    #[test]
    fn test_sink_on_mutex() {
        let shared = Mutex::new(TemperatureState::new(25.0));
        shared.set_temperature_c(24.0);
        let state = shared.lock().unwrap();
        assert!(state.is_valid());
        assert_eq!(state.current_c(), 24.0);
    }

    #[test]
    fn test_linear_round_trip() {
        let model = LinearCompensation::new(0.0015, 25.0);
        for temp in [10.0, 18.5, 25.0, 27.3, 40.0] {
            for x in [0.0, 1.5, 412.5, 53_000.0] {
                let mut diag = Diagnostics::new();
                let back = model.normalize(model.denormalize(x, temp), temp, &mut diag);
                assert!((back - x).abs() <= 1e-9 * x.abs().max(1.0));
                assert!(diag.guards().is_empty());
            }
        }
    }

    #[test]
    fn test_denominator_floor() {
        let model = LinearCompensation::new(0.1, 25.0);
        let mut diag = Diagnostics::new();
        // 1 + 0.1 * (10 - 25) = -0.5 -> 0.1
        let out = model.normalize(5.0, 10.0, &mut diag);
        assert!((out - 50.0).abs() < 1e-9);
        assert!(diag.has_guard(|g| matches!(g, Guard::DenominatorClamped { .. })));
    }
}
