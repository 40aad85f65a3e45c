use crate::{I2cBus, TransportError};
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// 記録されたバス操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Write { address: u8, bytes: Vec<u8> },
    Read { address: u8, len: usize },
    WriteRegister { address: u8, register: u8, bytes: Vec<u8> },
    ReadRegister { address: u8, register: u8, len: usize },
}

impl BusOp {
    pub fn address(&self) -> u8 {
        match self {
            BusOp::Write { address, .. }
            | BusOp::Read { address, .. }
            | BusOp::WriteRegister { address, .. }
            | BusOp::ReadRegister { address, .. } => *address,
        }
    }
}

/// テスト用の I2C バスモック
///
/// 実際のハードウェアを使わずに I2C 通信をシミュレートします。
/// - `queue_response`: 次の書き込み（コマンド）に対する応答を予約
/// - `queue_read`: 書き込みと無関係に返す読み出し結果（エラーも可）
/// - `set_register` / `queue_register_read`: レジスタの読み出し値
///
/// 何も用意されていない読み出しには、アイドル状態のバスと同じく全 0xFF を返します。
/// すべての操作は記録され、テストで検証できます。
#[derive(Debug, Clone)]
pub struct MockI2cBus {
    /// 実行された操作の記録
    pub operations: Arc<Mutex<Vec<BusOp>>>,
    /// 書き込みで有効になる応答（アドレスごと、先頭から取り出される）
    pub responses: Arc<Mutex<HashMap<u8, VecDeque<Vec<u8>>>>>,
    /// 書き込みで有効になった、まだ読まれていない応答
    pub pending: Arc<Mutex<HashMap<u8, Vec<u8>>>>,
    /// 読み出し結果キュー（アドレスごと）
    pub reads: Arc<Mutex<HashMap<u8, VecDeque<Result<Vec<u8>, TransportError>>>>>,
    /// レジスタの固定値
    pub registers: Arc<Mutex<HashMap<(u8, u8), Vec<u8>>>>,
    /// レジスタの読み出し列（空になると固定値に戻る）
    pub register_reads: Arc<Mutex<HashMap<(u8, u8), VecDeque<Vec<u8>>>>>,
    /// 次の書き込みで返すエラー
    pub write_errors: Arc<Mutex<VecDeque<TransportError>>>,
}

impl Default for MockI2cBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockI2cBus {
    pub fn new() -> Self {
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reads: Arc::new(Mutex::new(HashMap::new())),
            registers: Arc::new(Mutex::new(HashMap::new())),
            register_reads: Arc::new(Mutex::new(HashMap::new())),
            write_errors: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// テスト用: 次のコマンド書き込みに対する応答を予約
    pub fn queue_response(&self, address: u8, payload: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .push_back(payload);
    }

    /// テスト用: ステータス OK + ASCII 本文 + NUL + 0xFF 埋めの 32 バイト応答を予約
    pub fn queue_ascii_response(&self, address: u8, text: &str) {
        self.queue_response(address, ascii_payload(text));
    }

    /// テスト用: 読み出し結果をキューに追加
    pub fn queue_read(&self, address: u8, payload: Vec<u8>) {
        self.reads
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .push_back(Ok(payload));
    }

    /// テスト用: 読み出しエラーをキューに追加
    pub fn queue_read_error(&self, address: u8, kind: ErrorKind) {
        self.reads
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .push_back(Err(TransportError::new(kind, "simulated read error")));
    }

    /// テスト用: 次の書き込みをエラーにする
    pub fn queue_write_error(&self, kind: ErrorKind) {
        self.write_errors
            .lock()
            .unwrap()
            .push_back(TransportError::new(kind, "simulated write error"));
    }

    /// テスト用: レジスタの固定値を設定
    pub fn set_register(&self, address: u8, register: u8, bytes: Vec<u8>) {
        self.registers
            .lock()
            .unwrap()
            .insert((address, register), bytes);
    }

    /// テスト用: レジスタの読み出し列を追加（固定値より優先）
    pub fn queue_register_read(&self, address: u8, register: u8, bytes: Vec<u8>) {
        self.register_reads
            .lock()
            .unwrap()
            .entry((address, register))
            .or_default()
            .push_back(bytes);
    }

    /// テスト用: 記録された操作を取得
    pub fn get_operations(&self) -> Vec<BusOp> {
        self.operations.lock().unwrap().clone()
    }

    /// テスト用: 指定アドレスの操作数
    pub fn operation_count(&self, address: u8) -> usize {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.address() == address)
            .count()
    }

    /// テスト用: 指定アドレスへ書き込まれたデータ
    pub fn get_writes(&self, address: u8) -> Vec<Vec<u8>> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                BusOp::Write { address: a, bytes } if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// テスト用: 記録をクリア
    pub fn clear_operations(&self) {
        self.operations.lock().unwrap().clear();
    }
}

/// ASCII ボードの応答フレームを作る
pub fn ascii_payload(text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.push(1);
    payload.extend_from_slice(text.as_bytes());
    payload.push(0x00);
    payload.resize(payload.len().max(32), 0xFF);
    payload
}

impl I2cBus for MockI2cBus {
    fn write_bytes(&self, address: u8, bytes: &[u8]) -> Result<(), TransportError> {
        self.operations.lock().unwrap().push(BusOp::Write {
            address,
            bytes: bytes.to_vec(),
        });

        if let Some(err) = self.write_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        // 次の応答を有効にする
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&address)
            .and_then(VecDeque::pop_front);
        if let Some(payload) = next {
            self.pending.lock().unwrap().insert(address, payload);
        }
        Ok(())
    }

    fn read_bytes(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        self.operations
            .lock()
            .unwrap()
            .push(BusOp::Read { address, len });

        if let Some(payload) = self.pending.lock().unwrap().remove(&address) {
            return Ok(payload);
        }

        let queued = self
            .reads
            .lock()
            .unwrap()
            .get_mut(&address)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(result) => result,
            None => Ok(vec![0xFF; len]),
        }
    }

    fn write_register(&self, address: u8, register: u8, bytes: &[u8]) -> Result<(), TransportError> {
        self.operations.lock().unwrap().push(BusOp::WriteRegister {
            address,
            register,
            bytes: bytes.to_vec(),
        });

        if let Some(err) = self.write_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(())
    }

    fn read_register(&self, address: u8, register: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        self.operations.lock().unwrap().push(BusOp::ReadRegister {
            address,
            register,
            len,
        });

        let queued = self
            .register_reads
            .lock()
            .unwrap()
            .get_mut(&(address, register))
            .and_then(VecDeque::pop_front);
        if let Some(bytes) = queued {
            return Ok(bytes);
        }

        self.registers
            .lock()
            .unwrap()
            .get(&(address, register))
            .cloned()
            .ok_or_else(|| {
                TransportError::new(
                    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
                    format!("no device at 0x{:02X}", address),
                )
            })
    }
}
