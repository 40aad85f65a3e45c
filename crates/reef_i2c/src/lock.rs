//! アドレス単位のプロセス共有ロック
//!
//! 同じ物理チップを指す複数のデバイスハンドルが、書き込み → 待機 → 読み出しの
//! 途中で割り込み合わないようにします。ロックは初回使用時に生成され、破棄されません。

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

static ADDRESS_LOCKS: Lazy<Mutex<HashMap<u8, &'static Mutex<()>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// アドレスに対応するロック（プロセス内で常に同一）
pub fn address_lock(address: u8) -> &'static Mutex<()> {
    let mut registry = ADDRESS_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    *registry
        .entry(address)
        .or_insert_with(|| &*Box::leak(Box::new(Mutex::new(()))))
}

/// アドレスのロックを取得するまでブロック
///
/// ガードのドロップで必ず解放されます。前の保持者がパニックしていても取得できます。
pub fn acquire(address: u8) -> MutexGuard<'static, ()> {
    address_lock(address)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
