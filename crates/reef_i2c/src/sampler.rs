//! 固定長フレームの読み出し（AliExpress 系 3 バイト ADC モジュール）
//!
//! 1. 新しいキャッシュがあればバスに触れずに返す
//! 2. 前回の転送から最小間隔を空ける
//! 3. 読み出し（一過性エラー・長さ不正・全 0xFF は一度だけ再試行）
//! 4. 成功した値をキャッシュし、短い安定待ちを入れる

use crate::{is_all_fill, lock, BusError, I2cBus, ProtocolViolation, QueryError, TransportError};
use log::{debug, warn};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// 最後に成功した取得結果
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSample {
    /// デコード済みの物理量
    pub value: f64,
    pub raw: Vec<u8>,
    /// デコード済みの ADC コード
    pub code: i64,
    pub taken_at: Instant,
}

/// 取得結果とキャッシュヒットの有無
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub sample: CachedSample,
    pub from_cache: bool,
}

/// 同一デバイスへの連続転送の最小間隔
#[derive(Debug, Clone)]
pub struct Pacer {
    min_gap: Duration,
    last_transfer_at: Option<Instant>,
}

impl Pacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_transfer_at: None,
        }
    }

    /// 前回の転送から `min_gap` 経っていなければ残りを待つ
    pub fn wait(&self) {
        let Some(last) = self.last_transfer_at else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < self.min_gap {
            thread::sleep(self.min_gap - elapsed);
        }
    }

    pub fn mark(&mut self) {
        self.last_transfer_at = Some(Instant::now());
    }

    pub fn last_transfer_at(&self) -> Option<Instant> {
        self.last_transfer_at
    }
}

/// 短期キャッシュ（`now - taken_at < max_age` の間だけ有効）
#[derive(Debug, Clone)]
pub struct SampleCache {
    max_age: Duration,
    last: Option<CachedSample>,
}

impl SampleCache {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age, last: None }
    }

    pub fn fresh(&self, now: Instant) -> Option<&CachedSample> {
        self.last
            .as_ref()
            .filter(|s| now.saturating_duration_since(s.taken_at) < self.max_age)
    }

    pub fn store(&mut self, sample: CachedSample) {
        self.last = Some(sample);
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<&CachedSample> {
        self.last.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerTiming {
    pub frame_len: usize,
    pub cache_max_age: Duration,
    pub min_gap: Duration,
    /// 一過性バスエラー後の再試行待ち
    pub transient_retry_delay: Duration,
    /// 長さ不正・全 0xFF 後の再試行待ち
    pub frame_retry_delay: Duration,
    pub settle_after_read: Duration,
}

impl Default for SamplerTiming {
    fn default() -> Self {
        Self {
            frame_len: 3,
            cache_max_age: Duration::from_millis(250),
            min_gap: Duration::from_millis(35),
            transient_retry_delay: Duration::from_millis(20),
            frame_retry_delay: Duration::from_millis(10),
            settle_after_read: Duration::from_millis(2),
        }
    }
}

#[derive(Debug)]
struct SamplerState {
    pacer: Pacer,
    cache: SampleCache,
}

/// 読み出し一回分の失敗
enum FrameFault {
    Transport(TransportError),
    Protocol(ProtocolViolation),
}

pub struct FrameSampler<B> {
    bus: B,
    address: u8,
    timing: SamplerTiming,
    state: Mutex<SamplerState>,
}

impl<B: I2cBus> FrameSampler<B> {
    pub fn new(bus: B, address: u8, timing: SamplerTiming) -> Self {
        Self {
            bus,
            address,
            timing,
            state: Mutex::new(SamplerState {
                pacer: Pacer::new(timing.min_gap),
                cache: SampleCache::new(timing.cache_max_age),
            }),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn timing(&self) -> &SamplerTiming {
        &self.timing
    }

    /// キャッシュを捨てて次回は必ずバスから読む
    pub fn invalidate(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache
            .invalidate();
    }

    /// フレームを取得してデコードする（`decode` は `(code, value)` を返す）
    pub fn sample<E>(
        &self,
        decode: impl FnOnce(&[u8]) -> Result<(i64, f64), E>,
    ) -> Result<Fetched, QueryError<E>> {
        let _address_guard = lock::acquire(self.address);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = state.cache.fresh(Instant::now()) {
            debug!(
                "i2c 0x{:02X} cache hit age={:?} value={:.3}",
                self.address,
                cached.taken_at.elapsed(),
                cached.value
            );
            return Ok(Fetched {
                sample: cached.clone(),
                from_cache: true,
            });
        }

        state.pacer.wait();
        let payload = self.read_frame(&mut state.pacer)?;

        let (code, value) = decode(&payload).map_err(|source| QueryError::Decode {
            response: format!("{:02X?}", payload),
            attempts: 1,
            source,
        })?;

        let sample = CachedSample {
            value,
            raw: payload,
            code,
            taken_at: Instant::now(),
        };
        state.cache.store(sample.clone());

        thread::sleep(self.timing.settle_after_read);

        Ok(Fetched {
            sample,
            from_cache: false,
        })
    }

    fn read_frame(&self, pacer: &mut Pacer) -> Result<Vec<u8>, BusError> {
        let delay = match self.read_once(pacer, 1) {
            Ok(payload) => return Ok(payload),
            Err(FrameFault::Transport(e)) if e.is_transient() => self.timing.transient_retry_delay,
            Err(FrameFault::Transport(e)) => return Err(BusError::transport(self.address, e)),
            Err(FrameFault::Protocol(_)) => self.timing.frame_retry_delay,
        };
        thread::sleep(delay);
        self.read_once(pacer, 2).map_err(|f| self.to_bus_error(f))
    }

    fn read_once(&self, pacer: &mut Pacer, attempt: u32) -> Result<Vec<u8>, FrameFault> {
        pacer.mark();
        let payload = self
            .bus
            .read_bytes(self.address, self.timing.frame_len)
            .map_err(|e| {
                warn!("i2c 0x{:02X} read attempt={} error={}", self.address, attempt, e);
                FrameFault::Transport(e)
            })?;

        if payload.len() != self.timing.frame_len {
            warn!(
                "i2c 0x{:02X} read attempt={} short payload={:02X?}",
                self.address, attempt, payload
            );
            return Err(FrameFault::Protocol(ProtocolViolation::WrongLength {
                expected: self.timing.frame_len,
                got: payload.len(),
            }));
        }
        if is_all_fill(&payload) {
            warn!("i2c 0x{:02X} read attempt={} payload is all 0xFF", self.address, attempt);
            return Err(FrameFault::Protocol(ProtocolViolation::AllFill));
        }

        debug!("i2c 0x{:02X} read attempt={} payload={:02X?}", self.address, attempt, payload);
        Ok(payload)
    }

    fn to_bus_error(&self, fault: FrameFault) -> BusError {
        match fault {
            FrameFault::Transport(source) => BusError::transport(self.address, source),
            FrameFault::Protocol(reason) => BusError::protocol(self.address, reason),
        }
    }
}
