//! 生データ → 物理量のデコード
//!
//! - ASCII 応答（Robo-Tank 系ボード）: 最初の数値トークンを取り出す
//! - 3 バイトのオフセットバイナリ ADC（AliExpress 系 pH/ORP モジュール）
//! - ADS1115 の符号付き 16bit 変換結果（ゲイン・マルチプレクサ付き）

use crate::diagnostics::{Diagnostics, Guard};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

/// オフセットバイナリ ADC の中点コード（0V に相当）
pub const OFFSET_BINARY_MID: i64 = 0x2000_0000;

/// 2^29（符号付きコード → 正規化電圧）
pub const OFFSET_BINARY_SCALE: f64 = 536_870_912.0;

/// 3 バイトフレームから取り出すコードのビットマスク（30bit）
const OFFSET_BINARY_MASK: u32 = 0x3FFF_FFFF;

/// 応答中の最初の数値トークン（小数点としてのカンマも許容）
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-+]?[0-9]+(?:[.,][0-9]+)?").expect("Invalid number token regex")
});

/// ADS1115 のフルスケールカウント（-32768..32767）
pub const ADS1115_FULL_SCALE_COUNTS: f64 = 32_768.0;

/// デコードエラー（ParseError 系）
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("no numeric token in response {response:?}")]
    NoNumber { response: String },
    #[error("malformed number {token:?} in response {response:?}")]
    BadNumber { token: String, response: String },
    #[error("expected {expected} raw bytes, got {got}")]
    FrameLength { expected: usize, got: usize },
    #[error("decoded value is not finite: {value}")]
    NonFinite { value: f64 },
}

/// 生データを物理量へ変換するストラテジ
pub trait Decoder {
    type Raw: ?Sized;

    fn decode(&self, raw: &Self::Raw, diag: &mut Diagnostics) -> Result<f64, DecodeError>;
}

/// 応答文字列から最初の数値トークンを取り出して f64 に変換します
///
/// `"14.322"`, `"U=14.322"`, `"14.322,OK"`, `"U,14.322"`, `"U=14,322"` の
/// いずれも 14.322 になります。小数点としてのカンマも許容します。
///
/// # Examples
/// ```
/// use conditioning_core::parse_first_float;
///
/// assert_eq!(parse_first_float("U=14,322").unwrap(), 14.322);
/// ```
pub fn parse_first_float(response: &str) -> Result<f64, DecodeError> {
    let token = FIRST_NUMBER
        .find(response)
        .ok_or_else(|| DecodeError::NoNumber {
            response: response.to_string(),
        })?
        .as_str();

    token
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| DecodeError::BadNumber {
            token: token.to_string(),
            response: response.to_string(),
        })
}

/// ASCII 応答デコーダ
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiDecoder;

impl Decoder for AsciiDecoder {
    type Raw = str;

    fn decode(&self, raw: &str, _diag: &mut Diagnostics) -> Result<f64, DecodeError> {
        parse_first_float(raw)
    }
}

/// 3 バイトのオフセットバイナリフレームから 30bit コードを復元します
///
/// `u32 = b0<<24 | b1<<16 | b2<<8; u32 >>= 2; u32 &= 0x3FFFFFFF`
pub fn offset_binary_code(frame: &[u8]) -> Result<u32, DecodeError> {
    let [b0, b1, b2] = <[u8; 3]>::try_from(frame).map_err(|_| DecodeError::FrameLength {
        expected: 3,
        got: frame.len(),
    })?;

    let word = u32::from(b0) << 24 | u32::from(b1) << 16 | u32::from(b2) << 8;
    Ok((word >> 2) & OFFSET_BINARY_MASK)
}

/// オフセットバイナリコードを電圧（V）に変換します
///
/// 中点コードは厳密に 0V になります。
pub fn offset_binary_to_volts(code: u32, vref_v: f64) -> f64 {
    let signed = i64::from(code) - OFFSET_BINARY_MID;
    signed as f64 / OFFSET_BINARY_SCALE * vref_v
}

/// 3 バイト ADC モジュールのデコーダ（出力は mV）
#[derive(Debug, Clone, Copy)]
pub struct OffsetBinaryDecoder {
    /// ADC 基準電圧（V）
    pub vref_v: f64,
}

impl OffsetBinaryDecoder {
    pub fn new(vref_v: f64) -> Self {
        Self { vref_v }
    }

    /// コードと mV を同時に返す（キャッシュ保存用）
    pub fn code_and_millivolts(&self, frame: &[u8]) -> Result<(u32, f64), DecodeError> {
        let code = offset_binary_code(frame)?;
        let mv = offset_binary_to_volts(code, self.vref_v) * 1000.0;
        if !mv.is_finite() {
            return Err(DecodeError::NonFinite { value: mv });
        }
        Ok((code, mv))
    }
}

impl Decoder for OffsetBinaryDecoder {
    type Raw = [u8];

    fn decode(&self, raw: &[u8], diag: &mut Diagnostics) -> Result<f64, DecodeError> {
        let (code, mv) = self.code_and_millivolts(raw)?;
        diag.record("adc_code", f64::from(code));
        debug!("offset-binary raw={:02X?} code=0x{:08X} mv={:.3}", raw, code, mv);
        Ok(mv)
    }
}

/// ADS1115 の PGA ゲイン設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsGain {
    TwoThirds,
    One,
    Two,
    Four,
    Eight,
    Sixteen,
}

impl AdsGain {
    pub const fn config_bits(self) -> u16 {
        match self {
            AdsGain::TwoThirds => 0x0000,
            AdsGain::One => 0x0200,
            AdsGain::Two => 0x0400,
            AdsGain::Four => 0x0600,
            AdsGain::Eight => 0x0800,
            AdsGain::Sixteen => 0x0A00,
        }
    }

    /// フルスケール電圧（±V）
    pub const fn full_scale_volts(self) -> f64 {
        match self {
            AdsGain::TwoThirds => 6.144,
            AdsGain::One => 4.096,
            AdsGain::Two => 2.048,
            AdsGain::Four => 1.024,
            AdsGain::Eight => 0.512,
            AdsGain::Sixteen => 0.256,
        }
    }

    /// 設定ファイル上のラベル（"2/3", "1", "2", "4", "8", "16"）から変換
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "2/3" | "0.667" | "twothirds" => Some(AdsGain::TwoThirds),
            "1" => Some(AdsGain::One),
            "2" => Some(AdsGain::Two),
            "4" => Some(AdsGain::Four),
            "8" => Some(AdsGain::Eight),
            "16" => Some(AdsGain::Sixteen),
            _ => None,
        }
    }
}

/// ADS1115 の single-ended マルチプレクサ（AINx vs GND）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsMux {
    Ain0,
    Ain1,
    Ain2,
    Ain3,
}

impl AdsMux {
    pub fn single_ended(channel: u8) -> Option<Self> {
        match channel {
            0 => Some(AdsMux::Ain0),
            1 => Some(AdsMux::Ain1),
            2 => Some(AdsMux::Ain2),
            3 => Some(AdsMux::Ain3),
            _ => None,
        }
    }

    pub const fn config_bits(self) -> u16 {
        match self {
            AdsMux::Ain0 => 0x4000,
            AdsMux::Ain1 => 0x5000,
            AdsMux::Ain2 => 0x6000,
            AdsMux::Ain3 => 0x7000,
        }
    }

    pub const fn channel(self) -> u8 {
        match self {
            AdsMux::Ain0 => 0,
            AdsMux::Ain1 => 1,
            AdsMux::Ain2 => 2,
            AdsMux::Ain3 => 3,
        }
    }
}

/// ADS1115 カウント → 電圧（V）
pub fn ads_counts_to_volts(raw: i16, gain: AdsGain) -> f64 {
    f64::from(raw) / ADS1115_FULL_SCALE_COUNTS * gain.full_scale_volts()
}

/// single-ended 入力として [0, clamp_v] に収める
pub fn clamp_single_ended(volts: f64, clamp_v: f64, diag: &mut Diagnostics) -> f64 {
    let clamped = volts.clamp(0.0, clamp_v);
    if clamped != volts {
        diag.guard(Guard::VoltageClamped {
            raw: volts,
            clamped,
        });
    }
    clamped
}

/// 変換レジスタの 2 バイト（ビッグエンディアン）を符号付きカウントにします
pub fn ads1115_counts(raw: &[u8]) -> Result<i16, DecodeError> {
    let bytes = <[u8; 2]>::try_from(raw).map_err(|_| DecodeError::FrameLength {
        expected: 2,
        got: raw.len(),
    })?;
    Ok(i16::from_be_bytes(bytes))
}

/// ADS1115 変換レジスタ（ビッグエンディアン 2 バイト）のデコーダ（出力は V）
#[derive(Debug, Clone, Copy)]
pub struct Ads1115Decoder {
    pub gain: AdsGain,
    /// 配線上の上限電圧（通常 3.3V または 5.0V）
    pub clamp_v: f64,
}

impl Decoder for Ads1115Decoder {
    type Raw = [u8];

    fn decode(&self, raw: &[u8], diag: &mut Diagnostics) -> Result<f64, DecodeError> {
        let counts = ads1115_counts(raw)?;
        diag.record("raw", f64::from(counts));

        if counts < 0 {
            // 正しい single-ended 配線なら負にはならない
            warn!("ads1115 raw is negative ({}) on a single-ended input; check wiring/mux", counts);
            diag.guard(Guard::NegativeCode {
                code: i64::from(counts),
            });
        }

        let unclamped = ads_counts_to_volts(counts, self.gain);
        let volts = clamp_single_ended(unclamped, self.clamp_v, diag);
        if !volts.is_finite() {
            return Err(DecodeError::NonFinite { value: volts });
        }

        debug!(
            "ads1115 counts={} fs={:.3}V volts_unclamped={:.6} volts={:.6}",
            counts,
            self.gain.full_scale_volts(),
            unclamped,
            volts
        );
        diag.record("volts_raw", volts);
        Ok(volts)
    }
}
