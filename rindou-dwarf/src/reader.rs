//! ターゲットメモリ読み取りの抽象化

use crate::Result;

/// ターゲットプロセスのメモリを読み取るトレイト
///
/// 実装はptraceバックエンドのほか、テスト用の固定バッファでも構いません。
/// `is_stack`は読み取り元がスタック領域かどうかのヒントで、アドレスの解釈は
/// 変わりません。
pub trait MemoryReader {
    /// `len`バイトを読み取る
    fn read(&self, addr: u64, is_stack: bool, len: usize) -> Result<Vec<u8>>;

    /// リトルエンディアンのu32を読み取る
    fn read_u32(&self, addr: u64, is_stack: bool) -> Result<u32> {
        let bytes = self.read(addr, is_stack, 4)?;
        let arr: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("short read at 0x{:x}", addr))?;
        Ok(u32::from_le_bytes(arr))
    }

    /// リトルエンディアンのu64を読み取る
    fn read_u64(&self, addr: u64, is_stack: bool) -> Result<u64> {
        let bytes = self.read(addr, is_stack, 8)?;
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("short read at 0x{:x}", addr))?;
        Ok(u64::from_le_bytes(arr))
    }
}
