//! レジスタ型 ADC の単発変換
//!
//! 設定レジスタへ 16bit ワードを書いて変換を開始し、完了ビットが立つまで
//! 同じレジスタをポーリングしてから結果レジスタを読みます。
//! ポーリングのタイムアウトは再試行しません。

use crate::sampler::{CachedSample, Fetched, Pacer, SampleCache};
use crate::{lock, retry_transient, BusError, I2cBus, ProtocolViolation, QueryError};
use log::{debug, warn};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// 一回の変換要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub config_register: u8,
    pub result_register: u8,
    /// 書き込む設定ワード（ビッグエンディアンで送信）
    pub config: u16,
    /// 読み戻した設定ワードでこのビットが立てば完了
    pub ready_mask: u16,
    pub result_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterTiming {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub cache_max_age: Duration,
    pub min_gap: Duration,
    pub transient_retry_delay: Duration,
}

impl Default for RegisterTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(200),
            timeout: Duration::from_millis(50),
            cache_max_age: Duration::from_millis(250),
            min_gap: Duration::from_millis(5),
            transient_retry_delay: Duration::from_millis(20),
        }
    }
}

#[derive(Debug)]
struct RegisterState {
    pacer: Pacer,
    cache: SampleCache,
    /// キャッシュを作った変換の設定ワード
    cached_config: Option<u16>,
}

pub struct RegisterTransactor<B> {
    bus: B,
    address: u8,
    timing: RegisterTiming,
    state: Mutex<RegisterState>,
}

impl<B: I2cBus> RegisterTransactor<B> {
    pub fn new(bus: B, address: u8, timing: RegisterTiming) -> Self {
        Self {
            bus,
            address,
            timing,
            state: Mutex::new(RegisterState {
                pacer: Pacer::new(timing.min_gap),
                cache: SampleCache::new(timing.cache_max_age),
                cached_config: None,
            }),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn timing(&self) -> &RegisterTiming {
        &self.timing
    }

    /// 変換を実行してデコードする（`decode` は `(code, value)` を返す）
    ///
    /// 同じ設定ワードの変換結果がキャッシュ期間内にあれば、バスに触れずに返します。
    pub fn convert<E>(
        &self,
        conversion: &Conversion,
        decode: impl FnOnce(&[u8]) -> Result<(i64, f64), E>,
    ) -> Result<Fetched, QueryError<E>> {
        let _address_guard = lock::acquire(self.address);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.cached_config != Some(conversion.config) {
            state.cache.invalidate();
        }
        if let Some(cached) = state.cache.fresh(Instant::now()) {
            debug!(
                "i2c 0x{:02X} cache hit cfg=0x{:04X} code={}",
                self.address, conversion.config, cached.code
            );
            return Ok(Fetched {
                sample: cached.clone(),
                from_cache: true,
            });
        }

        state.pacer.wait();
        state.pacer.mark();
        let raw = self.run(conversion)?;

        let (code, value) = decode(&raw).map_err(|source| QueryError::Decode {
            response: format!("{:02X?}", raw),
            attempts: 1,
            source,
        })?;

        let sample = CachedSample {
            value,
            raw,
            code,
            taken_at: Instant::now(),
        };
        state.cache.store(sample.clone());
        state.cached_config = Some(conversion.config);

        Ok(Fetched {
            sample,
            from_cache: false,
        })
    }

    fn run(&self, conversion: &Conversion) -> Result<Vec<u8>, BusError> {
        let address = self.address;
        debug!(
            "i2c 0x{:02X} write reg=0x{:02X} cfg=0x{:04X}",
            address, conversion.config_register, conversion.config
        );
        retry_transient(address, self.timing.transient_retry_delay, || {
            self.bus.write_register(
                address,
                conversion.config_register,
                &conversion.config.to_be_bytes(),
            )
        })?;

        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            let bytes = self
                .bus
                .read_register(address, conversion.config_register, 2)
                .map_err(|source| BusError::transport(address, source))?;
            let word = be_word(&bytes).ok_or_else(|| {
                BusError::protocol(
                    address,
                    ProtocolViolation::WrongLength {
                        expected: 2,
                        got: bytes.len(),
                    },
                )
            })?;
            polls += 1;

            if word & conversion.ready_mask != 0 {
                debug!(
                    "i2c 0x{:02X} ready after polls={} elapsed={:?} cfg=0x{:04X}",
                    address,
                    polls,
                    started.elapsed(),
                    word
                );
                break;
            }
            if started.elapsed() > self.timing.timeout {
                warn!(
                    "i2c 0x{:02X} conversion timeout after polls={} last cfg=0x{:04X}",
                    address, polls, word
                );
                return Err(BusError::Timeout {
                    address,
                    timeout: self.timing.timeout,
                    last_config: word,
                });
            }
            thread::sleep(self.timing.poll_interval);
        }

        let raw = self
            .bus
            .read_register(address, conversion.result_register, conversion.result_len)
            .map_err(|source| BusError::transport(address, source))?;
        if raw.len() != conversion.result_len {
            return Err(BusError::protocol(
                address,
                ProtocolViolation::WrongLength {
                    expected: conversion.result_len,
                    got: raw.len(),
                },
            ));
        }
        debug!("i2c 0x{:02X} read reg=0x{:02X} bytes={:02X?}", address, conversion.result_register, raw);
        Ok(raw)
    }
}

fn be_word(bytes: &[u8]) -> Option<u16> {
    <[u8; 2]>::try_from(bytes).ok().map(u16::from_be_bytes)
}
