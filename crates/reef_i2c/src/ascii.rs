//! ASCII コマンドプロトコル（Robo-Tank 系ボード）
//!
//! コマンド文字列 + NUL を書き込み、固定の待ち時間の後に固定長の応答を読みます。
//! 応答の先頭バイトはステータス（1 = OK）、残りは NUL 終端・0xFF 埋めの ASCII です。

use crate::{is_all_fill, lock, retry_transient, BusError, I2cBus, ProtocolViolation, QueryError};
use log::{debug, warn};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::sampler::Pacer;

/// ステータスバイト: 成功
pub const STATUS_OK: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsciiTiming {
    /// コマンド書き込み後の待ち時間
    pub settle: Duration,
    pub response_len: usize,
    /// 一過性エラー（NACK / バスエラー）の再試行までの待ち時間
    pub transient_retry_delay: Duration,
    /// 全 0xFF 応答の再読み出しまでの待ち時間
    pub fill_retry_delay: Duration,
    /// 読み出し + 解析の試行回数（1 なら再試行なし）
    pub parse_attempts: usize,
    pub parse_backoff: Duration,
    /// コマンド前にファームウェアの残り応答を読み捨てる
    pub drain_before_command: bool,
    pub min_gap: Duration,
}

impl Default for AsciiTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(300),
            response_len: 32,
            transient_retry_delay: Duration::from_millis(20),
            fill_retry_delay: Duration::from_millis(50),
            parse_attempts: 1,
            parse_backoff: Duration::from_millis(50),
            drain_before_command: false,
            min_gap: Duration::ZERO,
        }
    }
}

pub struct AsciiTransactor<B> {
    bus: B,
    address: u8,
    timing: AsciiTiming,
    pacer: Mutex<Pacer>,
}

impl<B: I2cBus> AsciiTransactor<B> {
    pub fn new(bus: B, address: u8, timing: AsciiTiming) -> Self {
        Self {
            bus,
            address,
            timing,
            pacer: Mutex::new(Pacer::new(timing.min_gap)),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn timing(&self) -> &AsciiTiming {
        &self.timing
    }

    /// コマンドを送り、応答を `parse` が成功するまで（最大 `parse_attempts` 回）読み直す
    ///
    /// 書き込み → 待機 → 読み出しの全体をアドレスロック下で行います。
    pub fn query<T, E>(
        &self,
        command: &str,
        mut parse: impl FnMut(&str) -> Result<T, E>,
    ) -> Result<T, QueryError<E>> {
        let _address_guard = lock::acquire(self.address);
        self.command(command)?;

        let attempts = self.timing.parse_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.read_text() {
                Ok(text) => {
                    debug!("i2c 0x{:02X} cmd={:?} resp={:?}", self.address, command, text);
                    match parse(&text) {
                        Ok(value) => return Ok(value),
                        Err(source) => {
                            last_error = Some(QueryError::Decode {
                                response: text,
                                attempts: attempt,
                                source,
                            })
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "i2c 0x{:02X} cmd={:?} read attempt={} failed: {}",
                        self.address, command, attempt, e
                    );
                    last_error = Some(QueryError::Bus(e));
                }
            }
            if attempt < attempts {
                thread::sleep(self.timing.parse_backoff);
            }
        }

        // attempts >= 1 なので必ず Some
        Err(last_error.unwrap_or_else(|| {
            QueryError::Bus(BusError::protocol(self.address, ProtocolViolation::EmptyPayload))
        }))
    }

    /// コマンドを送り、応答文字列をそのまま返す（ファームウェア情報など）
    pub fn query_text(&self, command: &str) -> Result<String, BusError> {
        let _address_guard = lock::acquire(self.address);
        self.command(command)?;
        self.read_text()
    }

    /// 応答を読まないコマンド（設定変更など）
    pub fn send(&self, command: &str) -> Result<(), BusError> {
        let _address_guard = lock::acquire(self.address);
        self.command(command)
    }

    fn command(&self, command: &str) -> Result<(), BusError> {
        {
            let mut pacer = self.pacer.lock().unwrap_or_else(PoisonError::into_inner);
            pacer.wait();
            pacer.mark();
        }

        if self.timing.drain_before_command {
            // 前回の未読応答を捨てる（失敗は無視）
            if let Ok(stale) = self.bus.read_bytes(self.address, self.timing.response_len) {
                debug!("i2c 0x{:02X} drained {:02X?}", self.address, stale);
            }
        }

        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(0x00);
        debug!("i2c 0x{:02X} write cmd={:?}", self.address, command);
        retry_transient(self.address, self.timing.transient_retry_delay, || {
            self.bus.write_bytes(self.address, &frame)
        })?;

        thread::sleep(self.timing.settle);
        Ok(())
    }

    fn read_payload(&self) -> Result<Vec<u8>, BusError> {
        let payload = retry_transient(self.address, self.timing.transient_retry_delay, || {
            self.bus.read_bytes(self.address, self.timing.response_len)
        })?;
        if payload.is_empty() {
            return Err(BusError::protocol(self.address, ProtocolViolation::EmptyPayload));
        }
        Ok(payload)
    }

    fn read_text(&self) -> Result<String, BusError> {
        let mut payload = self.read_payload()?;
        debug!("i2c 0x{:02X} read payload={:02X?}", self.address, payload);

        if is_all_fill(&payload) {
            thread::sleep(self.timing.fill_retry_delay);
            payload = self.read_payload()?;
            debug!("i2c 0x{:02X} read retry payload={:02X?}", self.address, payload);
            if is_all_fill(&payload) {
                return Err(BusError::protocol(self.address, ProtocolViolation::AllFill));
            }
        }

        decode_response(&payload).map_err(|reason| BusError::protocol(self.address, reason))
    }
}

/// ステータスバイトを確認し、NUL で切って末尾の 0xFF を落とした文字列を返す
pub fn decode_response(payload: &[u8]) -> Result<String, ProtocolViolation> {
    let (&status, body) = payload
        .split_first()
        .ok_or(ProtocolViolation::EmptyPayload)?;
    if status != STATUS_OK {
        return Err(ProtocolViolation::DeviceStatus {
            status,
            payload: format!("{:02X?}", payload),
        });
    }

    let body = match body.iter().position(|&b| b == 0x00) {
        Some(nul) => &body[..nul],
        None => body,
    };
    let end = body.iter().rposition(|&b| b != 0xFF).map_or(0, |i| i + 1);

    Ok(String::from_utf8_lossy(&body[..end]).trim().to_string())
}
