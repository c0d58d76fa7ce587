//! ロケーション式の評価
//!
//! 変数・メンバのアドレスを決めるDWARFロケーション式を解釈します。
//! 対応する演算は実際のCコンパイラ出力で変数記述に現れる最小集合
//! （addr/fbreg/bregN/plus_uconst/deref/litN）です。

use std::rc::Rc;

use anyhow::anyhow;
use gimli::Reader;

use crate::context::FrameContext;
use crate::reader::MemoryReader;
use crate::tree::MetaTree;
use crate::Result;

/// ロケーション式評価のトレイト
///
/// 戻り値は(アドレス, スタック領域かどうか)の組です。
pub trait LocEval {
    /// ブロックフォームの式を評価する
    ///
    /// `initial`はメンバアクセス時の親のアドレスで、式のスタックの初期値に
    /// なります。
    fn eval_block(
        &self,
        ctx: &FrameContext,
        expr: &[u8],
        frame_base: u64,
        initial: Option<(u64, bool)>,
    ) -> Result<(u64, bool)>;

    /// オフセットフォーム（ロケーションリスト参照）を評価する
    ///
    /// 現在のPCを含むエントリを探して、その式を評価します。
    fn eval_offset(
        &self,
        ctx: &FrameContext,
        cu_base: u64,
        tree: &MetaTree,
        offset: u64,
    ) -> Result<(u64, bool)>;
}

/// ロケーション式のインタープリタ
pub struct ExprEvaluator {
    mem: Rc<dyn MemoryReader>,
    load_bias: u64,
}

impl ExprEvaluator {
    /// 評価器を作成する
    pub fn new(mem: Rc<dyn MemoryReader>) -> Self {
        Self { mem, load_bias: 0 }
    }

    /// ロードバイアス付きで評価器を作成する
    ///
    /// PIEバイナリでは静的アドレス(DW_OP_addr)に実行時ベースを加算します。
    pub fn with_bias(mem: Rc<dyn MemoryReader>, load_bias: u64) -> Self {
        Self { mem, load_bias }
    }
}

impl LocEval for ExprEvaluator {
    fn eval_block(
        &self,
        ctx: &FrameContext,
        expr: &[u8],
        frame_base: u64,
        initial: Option<(u64, bool)>,
    ) -> Result<(u64, bool)> {
        let mut data = gimli::EndianSlice::new(expr, gimli::LittleEndian);
        let mut state = initial;

        while !data.is_empty() {
            let op = data.read_u8()?;
            match op {
                // DW_OP_addr: 静的アドレス
                _ if op == gimli::constants::DW_OP_addr.0 => {
                    let addr = data.read_u64()?;
                    state = Some((addr.wrapping_add(self.load_bias), false));
                }
                // DW_OP_fbreg: フレームベース相対
                _ if op == gimli::constants::DW_OP_fbreg.0 => {
                    let offset = data.read_sleb128()?;
                    state = Some((frame_base.wrapping_add(offset as u64), true));
                }
                // DW_OP_breg0..31: レジスタ相対
                _ if (gimli::constants::DW_OP_breg0.0..=gimli::constants::DW_OP_breg31.0)
                    .contains(&op) =>
                {
                    let reg = (op - gimli::constants::DW_OP_breg0.0) as u16;
                    let offset = data.read_sleb128()?;
                    let base = ctx
                        .reg(reg)
                        .ok_or_else(|| anyhow!("register {} not available", reg))?;
                    let is_stack =
                        reg as usize == FrameContext::FP || reg as usize == FrameContext::SP;
                    state = Some((base.wrapping_add(offset as u64), is_stack));
                }
                // DW_OP_lit0..31: 小さな定数
                _ if (gimli::constants::DW_OP_lit0.0..=gimli::constants::DW_OP_lit31.0)
                    .contains(&op) =>
                {
                    state = Some(((op - gimli::constants::DW_OP_lit0.0) as u64, false));
                }
                // DW_OP_plus_uconst: 定数加算。スタック領域フラグは維持する
                _ if op == gimli::constants::DW_OP_plus_uconst.0 => {
                    let operand = data.read_uleb128()?;
                    let (addr, is_stack) =
                        state.ok_or_else(|| anyhow!("plus_uconst on empty stack"))?;
                    state = Some((addr.wrapping_add(operand), is_stack));
                }
                // DW_OP_deref: 現在のアドレスが指す先を読む
                _ if op == gimli::constants::DW_OP_deref.0 => {
                    let (addr, is_stack) = state.ok_or_else(|| anyhow!("deref on empty stack"))?;
                    let value = self.mem.read_u64(addr, is_stack)?;
                    state = Some((value, false));
                }
                _ => {
                    return Err(anyhow!("unsupported location op 0x{:02x}", op));
                }
            }
        }

        state.ok_or_else(|| anyhow!("empty location expression"))
    }

    fn eval_offset(
        &self,
        ctx: &FrameContext,
        cu_base: u64,
        tree: &MetaTree,
        offset: u64,
    ) -> Result<(u64, bool)> {
        let entries = tree
            .loclist(offset)
            .ok_or_else(|| anyhow!("no location list at offset 0x{:x}", offset))?;

        // エントリのアドレスはコンパイルユニットのベースからの相対
        for entry in entries {
            let begin = cu_base.wrapping_add(entry.begin);
            let end = cu_base.wrapping_add(entry.end);
            if ctx.pc >= begin && ctx.pc < end {
                return self.eval_block(ctx, &entry.expr, 0, None);
            }
        }

        Err(anyhow!(
            "no location list entry covers pc 0x{:x}",
            ctx.pc
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{LocListEntry, TreeBuilder};

    struct FakeMemory {
        base: u64,
        bytes: Vec<u8>,
    }

    impl MemoryReader for FakeMemory {
        fn read(&self, addr: u64, _is_stack: bool, len: usize) -> Result<Vec<u8>> {
            let start = addr
                .checked_sub(self.base)
                .ok_or_else(|| anyhow!("out of range read at 0x{:x}", addr))?
                as usize;
            let end = start + len;
            if end > self.bytes.len() {
                return Err(anyhow!("out of range read at 0x{:x}", addr));
            }
            Ok(self.bytes[start..end].to_vec())
        }
    }

    fn evaluator() -> ExprEvaluator {
        ExprEvaluator::new(Rc::new(FakeMemory {
            base: 0x5000,
            bytes: vec![0; 64],
        }))
    }

    #[test]
    fn test_fbreg_negative_offset() {
        // DW_OP_fbreg -8
        let expr = [gimli::constants::DW_OP_fbreg.0, 0x78];
        let ctx = FrameContext::default();
        let (addr, is_stack) = evaluator().eval_block(&ctx, &expr, 0x1000, None).unwrap();
        assert_eq!(addr, 0xff8);
        assert!(is_stack);
    }

    #[test]
    fn test_addr_with_load_bias() {
        // DW_OP_addr 0x2000
        let mut expr = vec![gimli::constants::DW_OP_addr.0];
        expr.extend_from_slice(&0x2000u64.to_le_bytes());
        let eval = ExprEvaluator::with_bias(
            Rc::new(FakeMemory {
                base: 0,
                bytes: vec![],
            }),
            0x5000_0000,
        );
        let ctx = FrameContext::default();
        let (addr, is_stack) = eval.eval_block(&ctx, &expr, 0, None).unwrap();
        assert_eq!(addr, 0x5000_2000);
        assert!(!is_stack);
    }

    #[test]
    fn test_plus_uconst_keeps_stack_flag() {
        let expr = [gimli::constants::DW_OP_plus_uconst.0, 0x10];
        let ctx = FrameContext::default();
        let (addr, is_stack) = evaluator()
            .eval_block(&ctx, &expr, 0, Some((0x7fff_0000, true)))
            .unwrap();
        assert_eq!(addr, 0x7fff_0010);
        assert!(is_stack);

        let (addr, is_stack) = evaluator()
            .eval_block(&ctx, &expr, 0, Some((0x2000, false)))
            .unwrap();
        assert_eq!(addr, 0x2010);
        assert!(!is_stack);
    }

    #[test]
    fn test_breg_rbp_is_stack() {
        // DW_OP_breg6 +16
        let expr = [gimli::constants::DW_OP_breg6.0, 0x10];
        let mut ctx = FrameContext::default();
        ctx.regs[FrameContext::FP] = 0x7fff_1000;
        let (addr, is_stack) = evaluator().eval_block(&ctx, &expr, 0, None).unwrap();
        assert_eq!(addr, 0x7fff_1010);
        assert!(is_stack);
    }

    #[test]
    fn test_deref_clears_stack_flag() {
        let mut bytes = vec![0u8; 16];
        bytes[..8].copy_from_slice(&0xdead_beefu64.to_le_bytes());
        let eval = ExprEvaluator::new(Rc::new(FakeMemory {
            base: 0x5000,
            bytes,
        }));
        // lit0を初期値代わりに使えないので initial で渡す
        let expr = [gimli::constants::DW_OP_deref.0];
        let ctx = FrameContext::default();
        let (addr, is_stack) = eval
            .eval_block(&ctx, &expr, 0, Some((0x5000, true)))
            .unwrap();
        assert_eq!(addr, 0xdead_beef);
        assert!(!is_stack);
    }

    #[test]
    fn test_unsupported_op() {
        // DW_OP_piece
        let expr = [gimli::constants::DW_OP_piece.0, 0x04];
        let ctx = FrameContext::default();
        assert!(evaluator().eval_block(&ctx, &expr, 0, None).is_err());
    }

    #[test]
    fn test_empty_expression() {
        let ctx = FrameContext::default();
        assert!(evaluator().eval_block(&ctx, &[], 0, None).is_err());
    }

    #[test]
    fn test_eval_offset_picks_covering_entry() {
        let mut builder = TreeBuilder::new();
        builder.add_loclist(
            0x40,
            vec![
                LocListEntry {
                    begin: 0x0,
                    end: 0x10,
                    expr: vec![gimli::constants::DW_OP_breg7.0, 0x00],
                },
                LocListEntry {
                    begin: 0x10,
                    end: 0x20,
                    expr: vec![gimli::constants::DW_OP_breg6.0, 0x00],
                },
            ],
        );
        let tree = builder.finish();

        let mut ctx = FrameContext::default();
        ctx.pc = 0x1018;
        ctx.regs[FrameContext::FP] = 0x7fff_2000;
        ctx.regs[FrameContext::SP] = 0x7fff_1000;

        let (addr, is_stack) = evaluator().eval_offset(&ctx, 0x1000, &tree, 0x40).unwrap();
        assert_eq!(addr, 0x7fff_2000);
        assert!(is_stack);

        // どのエントリにも含まれないPC
        ctx.pc = 0x1030;
        assert!(evaluator().eval_offset(&ctx, 0x1000, &tree, 0x40).is_err());
        // 未登録オフセット
        assert!(evaluator().eval_offset(&ctx, 0x1000, &tree, 0x99).is_err());
    }
}
