//! スタック巻き戻し
//!
//! フレームポインタ(rbp)の連鎖を辿る方式です。保存された親のrbpが
//! [rbp]、リターンアドレスが[rbp+8]にある前提で、-fomit-frame-pointer
//! でビルドされたコードでは途中で途切れます。

use rindou_dwarf::{FrameContext, MemoryReader};

/// フレームポインタ連鎖を辿って呼び出しフレーム列を得る
///
/// 先頭は現在実行中のフレームで、以降は呼び出し元の順です。読み取り
/// エラーや不正な連鎖で打ち切り、最大`max_depth`フレームまで辿ります。
pub fn walk_stack(
    mem: &dyn MemoryReader,
    start: FrameContext,
    max_depth: usize,
) -> Vec<FrameContext> {
    let mut frames = Vec::new();
    let mut ctx = start;

    while frames.len() < max_depth {
        let fp = ctx.fp();
        frames.push(ctx);

        if fp == 0 {
            break;
        }
        let Ok(saved_fp) = mem.read_u64(fp, true) else {
            break;
        };
        let Ok(ret_addr) = mem.read_u64(fp + 8, true) else {
            break;
        };
        // 保存rbpが0のフレームは連鎖の終端。それ以外の連鎖は
        // スタックの高位方向に単調のはず
        if ret_addr == 0 || (saved_fp != 0 && saved_fp <= fp) {
            break;
        }

        ctx = FrameContext::from_unwind(ret_addr, saved_fp, fp + 16);
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    /// スタックの一部だけを固定内容で返すテスト用メモリ
    struct StackImage {
        base: u64,
        bytes: Vec<u8>,
    }

    impl MemoryReader for StackImage {
        fn read(&self, addr: u64, _is_stack: bool, len: usize) -> Result<Vec<u8>> {
            let start = addr
                .checked_sub(self.base)
                .ok_or_else(|| anyhow::anyhow!("bad address 0x{:x}", addr))?
                as usize;
            let end = start + len;
            if end > self.bytes.len() {
                return Err(anyhow::anyhow!("bad address 0x{:x}", addr));
            }
            Ok(self.bytes[start..end].to_vec())
        }
    }

    fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
        bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_walks_frame_chain() {
        // 2段の呼び出し: fp=0x7000_0000 -> 0x7000_0040 -> 連鎖終端
        let base = 0x7000_0000u64;
        let mut bytes = vec![0u8; 0x100];
        put_u64(&mut bytes, 0x00, base + 0x40); // 保存されたrbp
        put_u64(&mut bytes, 0x08, 0x4011aa); // リターンアドレス
        put_u64(&mut bytes, 0x40, 0); // 終端
        put_u64(&mut bytes, 0x48, 0x401050);
        let mem = StackImage { base, bytes };

        let start = FrameContext::from_unwind(0x401200, base, base - 0x20);
        let frames = walk_stack(&mem, start, 64);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].pc, 0x401200);
        assert_eq!(frames[1].pc, 0x4011aa);
        assert_eq!(frames[1].fp(), base + 0x40);
        assert_eq!(frames[1].sp(), base + 0x10);
        assert_eq!(frames[2].pc, 0x401050);
        // fp=0で打ち切られている
        assert_eq!(frames[2].fp(), 0);
    }

    #[test]
    fn test_depth_limit() {
        // 自己参照しない無限風の連鎖を用意して上限で止まることを確認
        let base = 0x7000_0000u64;
        let mut bytes = vec![0u8; 0x1000];
        for i in 0..100 {
            let off = i * 0x20;
            put_u64(&mut bytes, off, base + (off as u64) + 0x20);
            put_u64(&mut bytes, off + 8, 0x400000 + i as u64);
        }
        let mem = StackImage { base, bytes };

        let start = FrameContext::from_unwind(0x401000, base, base);
        let frames = walk_stack(&mem, start, 8);
        assert_eq!(frames.len(), 8);
    }

    #[test]
    fn test_unreadable_stack_stops_chain() {
        let mem = StackImage {
            base: 0x7000_0000,
            bytes: vec![],
        };
        let start = FrameContext::from_unwind(0x401000, 0x6000_0000, 0x6000_0000);
        let frames = walk_stack(&mem, start, 64);
        assert_eq!(frames.len(), 1);
    }
}
