//! 診断情報（中間値・計算ガード・メモ）
//!
//! パイプラインの各段が記録する名前付きの数値シグナルと、
//! エラーにはしない計算ガード（クランプ・フォールバック等）を保持します。
//! キー名の表示方法は呼び出し側の責務です。
use std::collections::BTreeMap;
use std::time::Duration;

/// エラーとして伝播しない計算上のガード条件
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// 校正前の入力を安全範囲へクランプした
    InputClamped { raw: f64, clamped: f64 },
    /// 校正出力をセンサー種別の有効範囲へクランプした
    OutputClamped { raw: f64, clamped: f64 },
    /// 2 点の観測値が一致したため傾きゼロとして扱った
    ZeroSlope,
    /// 導電率の比率をオーバーシュート上限でクランプした
    RatioClamped { raw: f64, clamped: f64 },
    /// 温度補正の分母を下限値に固定した
    DenominatorClamped { raw: f64, floor: f64 },
    /// ネルンスト傾きが理想値へフォールバックした
    SlopeFallback,
    /// single-ended 入力の電圧を [0, clamp] に収めた
    VoltageClamped { raw: f64, clamped: f64 },
    /// single-ended 入力なのに負のコードを受信した
    NegativeCode { code: i64 },
    /// 温度補正が設定で無効
    CompensationDisabled,
    /// 温度が一度も注入されていない、または不明値が注入された
    TemperatureMissing,
    /// 最後の温度注入が古すぎる
    TemperatureStale { age: Duration },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    signals: BTreeMap<String, f64>,
    guards: Vec<Guard>,
    notes: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名前付きシグナルを記録（同じキーは上書き）
    pub fn record(&mut self, key: impl Into<String>, value: f64) {
        self.signals.insert(key.into(), value);
    }

    pub fn signal(&self, key: &str) -> Option<f64> {
        self.signals.get(key).copied()
    }

    pub fn signals(&self) -> &BTreeMap<String, f64> {
        &self.signals
    }

    pub fn guard(&mut self, guard: Guard) {
        self.guards.push(guard);
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn has_guard(&self, predicate: impl Fn(&Guard) -> bool) -> bool {
        self.guards.iter().any(predicate)
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// 別の診断情報を取り込む（キャッシュ済みサンプルの再利用時など）
    pub fn merge(&mut self, other: Diagnostics) {
        self.signals.extend(other.signals);
        self.guards.extend(other.guards);
        self.notes.extend(other.notes);
    }
}
