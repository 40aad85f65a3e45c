//! 共有 I2C バス上のトランザクションプロトコル
//!
//! - `I2cBus`: バイト単位のトランスポート（write / read / レジスタ write / レジスタ read）
//! - `HalBus`: 任意の `embedded_hal::i2c::I2c` 実装を `I2cBus` に変換するアダプタ
//! - `lock`: アドレス単位のプロセス共有ロック
//! - `ascii`: コマンド文字列 → 応答文字列（Robo-Tank 系ボード）
//! - `sampler`: 固定長フレーム読み出し（リトライ・間隔制御・キャッシュ付き）
//! - `register`: 設定レジスタ書き込み → 完了ビットのポーリング → 結果読み出し（ADC）

pub mod ascii;
pub mod lock;
#[cfg(feature = "mock")]
pub mod mock;
pub mod register;
pub mod sampler;

pub use ascii::{AsciiTiming, AsciiTransactor};
pub use register::{Conversion, RegisterTiming, RegisterTransactor};
pub use sampler::{CachedSample, Fetched, FrameSampler, Pacer, SampleCache, SamplerTiming};

use embedded_hal::i2c::{ErrorKind, I2c};
use log::warn;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// 一回のバス操作の失敗
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Linux の EREMOTEIO / EIO に相当する一過性エラーか
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::NoAcknowledge(_) | ErrorKind::Bus | ErrorKind::ArbitrationLoss
        )
    }

    fn from_hal<E: embedded_hal::i2c::Error>(error: E) -> Self {
        Self::new(error.kind(), format!("{:?}", error))
    }
}

/// プロトコルレベルの不正応答
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("empty payload")]
    EmptyPayload,
    #[error("payload is all 0xFF")]
    AllFill,
    #[error("expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("device status={status} payload={payload}")]
    DeviceStatus { status: u8, payload: String },
}

/// 最終的に呼び出し元へ返すバスエラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    #[error("i2c transport failed at 0x{address:02X}: {source}")]
    Transport {
        address: u8,
        #[source]
        source: TransportError,
    },
    #[error("device 0x{address:02X} not ready within {timeout:?} (last cfg=0x{last_config:04X})")]
    Timeout {
        address: u8,
        timeout: Duration,
        last_config: u16,
    },
    #[error("protocol error at 0x{address:02X}: {reason}")]
    Protocol {
        address: u8,
        reason: ProtocolViolation,
    },
}

impl BusError {
    pub fn transport(address: u8, source: TransportError) -> Self {
        BusError::Transport { address, source }
    }

    pub fn protocol(address: u8, reason: ProtocolViolation) -> Self {
        BusError::Protocol { address, reason }
    }
}

/// クエリ（バス操作 + デコード）のエラー
#[derive(Debug, thiserror::Error)]
pub enum QueryError<E> {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("undecodable response {response:?} after {attempts} attempt(s): {source}")]
    Decode {
        response: String,
        attempts: usize,
        #[source]
        source: E,
    },
}

/// バイト単位の I2C トランスポート
///
/// 複数のデバイスハンドルから共有されるため `&self` で操作します。
pub trait I2cBus: Send + Sync {
    fn write_bytes(&self, address: u8, bytes: &[u8]) -> Result<(), TransportError>;

    fn read_bytes(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError>;

    fn write_register(&self, address: u8, register: u8, bytes: &[u8]) -> Result<(), TransportError>;

    fn read_register(&self, address: u8, register: u8, len: usize) -> Result<Vec<u8>, TransportError>;
}

impl<B: I2cBus + ?Sized> I2cBus for Arc<B> {
    fn write_bytes(&self, address: u8, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_bytes(address, bytes)
    }

    fn read_bytes(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_bytes(address, len)
    }

    fn write_register(&self, address: u8, register: u8, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_register(address, register, bytes)
    }

    fn read_register(&self, address: u8, register: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_register(address, register, len)
    }
}

/// `embedded_hal::i2c::I2c` アダプタ
pub struct HalBus<I> {
    i2c: Mutex<I>,
}

impl<I> HalBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c: Mutex::new(i2c) }
    }

    pub fn into_inner(self) -> I {
        self.i2c.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I> fmt::Debug for HalBus<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalBus").finish_non_exhaustive()
    }
}

impl<I> I2cBus for HalBus<I>
where
    I: I2c + Send,
{
    fn write_bytes(&self, address: u8, bytes: &[u8]) -> Result<(), TransportError> {
        let mut i2c = self.i2c.lock().unwrap_or_else(PoisonError::into_inner);
        i2c.write(address, bytes).map_err(TransportError::from_hal)
    }

    fn read_bytes(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let mut i2c = self.i2c.lock().unwrap_or_else(PoisonError::into_inner);
        i2c.read(address, &mut buf).map_err(TransportError::from_hal)?;
        Ok(buf)
    }

    fn write_register(&self, address: u8, register: u8, bytes: &[u8]) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(register);
        frame.extend_from_slice(bytes);
        let mut i2c = self.i2c.lock().unwrap_or_else(PoisonError::into_inner);
        i2c.write(address, &frame).map_err(TransportError::from_hal)
    }

    fn read_register(&self, address: u8, register: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let mut i2c = self.i2c.lock().unwrap_or_else(PoisonError::into_inner);
        i2c.write_read(address, &[register], &mut buf)
            .map_err(TransportError::from_hal)?;
        Ok(buf)
    }
}

/// 一過性エラーは `delay` 後に一度だけ再試行する
pub fn retry_transient<T>(
    address: u8,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, TransportError>,
) -> Result<T, BusError> {
    match op() {
        Err(e) if e.is_transient() => {
            warn!("i2c 0x{:02X} transient error ({}); retrying once", address, e);
            thread::sleep(delay);
            op().map_err(|source| BusError::transport(address, source))
        }
        other => other.map_err(|source| BusError::transport(address, source)),
    }
}

/// 全バイトが 0xFF（バス浮き / デバイス無応答の典型）
pub fn is_all_fill(payload: &[u8]) -> bool {
    !payload.is_empty() && payload.iter().all(|&b| b == 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorType, NoAcknowledgeSource, Operation};

    /// 書き込みを記録し、読み出しには固定パターンを返す
    #[derive(Default)]
    struct FakeI2c {
        written: Vec<(u8, Vec<u8>)>,
        fail: Option<ErrorKind>,
    }

    impl ErrorType for FakeI2c {
        type Error = ErrorKind;
    }

    impl I2c for FakeI2c {
        fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
            if let Some(kind) = self.fail {
                return Err(kind);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.written.push((address, bytes.to_vec())),
                    Operation::Read(buf) => {
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = i as u8 + 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_hal_bus_register_framing() {
        let bus = HalBus::new(FakeI2c::default());
        bus.write_register(0x48, 0x01, &[0x85, 0x83]).unwrap();
        assert_eq!(bus.read_register(0x48, 0x00, 2).unwrap(), vec![1, 2]);
        assert_eq!(bus.read_bytes(0x24, 3).unwrap(), vec![1, 2, 3]);

        let fake = bus.into_inner();
        assert_eq!(fake.written[0], (0x48, vec![0x01, 0x85, 0x83]));
        // write_read はレジスタ番号を先に書く
        assert_eq!(fake.written[1], (0x48, vec![0x00]));
    }

    #[test]
    fn test_hal_error_kind_is_preserved() {
        let bus = HalBus::new(FakeI2c {
            fail: Some(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
            ..FakeI2c::default()
        });
        let err = bus.write_bytes(0x62, b"R\0").unwrap_err();
        assert!(err.is_transient());

        let bus = HalBus::new(FakeI2c {
            fail: Some(ErrorKind::Overrun),
            ..FakeI2c::default()
        });
        assert!(!bus.read_bytes(0x62, 32).unwrap_err().is_transient());
    }

    #[test]
    fn test_retry_transient_once() {
        let mut calls = 0;
        let result = retry_transient(0x24, Duration::ZERO, || {
            calls += 1;
            if calls == 1 {
                Err(TransportError::new(ErrorKind::Bus, "remote I/O error"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 2);

        let mut calls = 0;
        let result: Result<(), _> = retry_transient(0x24, Duration::ZERO, || {
            calls += 1;
            Err(TransportError::new(ErrorKind::Other, "permission denied"))
        });
        assert!(matches!(result, Err(BusError::Transport { address: 0x24, .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_all_fill() {
        assert!(is_all_fill(&[0xFF, 0xFF, 0xFF]));
        assert!(!is_all_fill(&[0xFF, 0x00]));
        assert!(!is_all_fill(&[]));
    }
}
