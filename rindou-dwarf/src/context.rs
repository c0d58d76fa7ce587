//! フレームコンテキスト
//!
//! ロケーション式の評価に必要なレジスタのスナップショットです。
//! レジスタ番号はx86_64のDWARF番号付けに従います:
//! 0=rax, 1=rdx, 2=rcx, 3=rbx, 4=rsi, 5=rdi, 6=rbp, 7=rsp,
//! 8-15=r8-r15, 16=リターンアドレス。

/// フレームのレジスタ状態
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameContext {
    /// プログラムカウンタ
    pub pc: u64,
    /// DWARF番号付けの汎用レジスタ
    pub regs: [u64; 17],
}

impl FrameContext {
    /// フレームポインタ(rbp)のDWARFレジスタ番号
    pub const FP: usize = 6;
    /// スタックポインタ(rsp)のDWARFレジスタ番号
    pub const SP: usize = 7;

    /// PCとフレーム/スタックポインタだけから構築する
    ///
    /// スタック巻き戻しで復元したフレームは他のレジスタを持たないため、
    /// 残りは0になります。
    pub fn from_unwind(pc: u64, fp: u64, sp: u64) -> Self {
        let mut ctx = Self::default();
        ctx.pc = pc;
        ctx.regs[Self::FP] = fp;
        ctx.regs[Self::SP] = sp;
        ctx.regs[16] = pc;
        ctx
    }

    /// DWARF番号でレジスタ値を取得する
    pub fn reg(&self, num: u16) -> Option<u64> {
        self.regs.get(num as usize).copied()
    }

    /// フレームポインタ
    pub fn fp(&self) -> u64 {
        self.regs[Self::FP]
    }

    /// スタックポインタ
    pub fn sp(&self) -> u64 {
        self.regs[Self::SP]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_unwind() {
        let ctx = FrameContext::from_unwind(0x1234, 0x7fff_0000, 0x7fff_0010);
        assert_eq!(ctx.pc, 0x1234);
        assert_eq!(ctx.fp(), 0x7fff_0000);
        assert_eq!(ctx.sp(), 0x7fff_0010);
        assert_eq!(ctx.reg(0), Some(0));
        assert_eq!(ctx.reg(17), None);
    }
}
