//! 変数スコープ
//!
//! あるフレームのPCを含む関数スコープと、その中の変数・仮引数の列挙です。
//! スコープ確定時にフレームベースを評価して保持します。

use crate::inspector::Inspector;
use crate::var::VarRef;
use rindou_dwarf::{AttrValue, FrameContext, NodeId};
use tracing::warn;

/// 変数スコープ
pub struct VarScope {
    scope: Option<NodeId>,
    /// PCだけデバッグ情報の座標に直したコンテキスト
    ctx: FrameContext,
    frame_base: u64,
    cu_base: u64,
    cursor: usize,
}

impl VarScope {
    /// フレームコンテキストからスコープを確定する
    ///
    /// PCを含む関数が見つからなくてもエラーにはならず、空のスコープに
    /// なります。
    pub fn new(insp: &Inspector, mut ctx: FrameContext) -> Self {
        ctx.pc = insp.debug_pc(ctx.pc);
        let tree = insp.tree();
        let scope = tree.find_scope_at_pc(ctx.pc);

        // ロケーションリストの基準になるコンパイルユニットの開始アドレス
        let cu_base = scope
            .and_then(|s| tree.parent(s))
            .filter(|p| tree.node(*p).map(|n| n.tag) == Some(gimli::DW_TAG_compile_unit))
            .and_then(|p| tree.udata(p, gimli::DW_AT_low_pc))
            .unwrap_or(0);

        let frame_base = match scope.and_then(|s| tree.attr(s, gimli::DW_AT_frame_base)) {
            Some(AttrValue::Block(expr)) => insp
                .eval()
                .eval_block(&ctx, expr, 0, None)
                .map(|(addr, _)| addr)
                .unwrap_or_else(|e| {
                    warn!("failed to evaluate frame base: {}", e);
                    0
                }),
            Some(AttrValue::LocListRef(offset)) => insp
                .eval()
                .eval_offset(&ctx, cu_base, tree, *offset)
                .map(|(addr, _)| addr)
                .unwrap_or_else(|e| {
                    warn!("failed to evaluate frame base: {}", e);
                    0
                }),
            Some(other) => {
                warn!("unhandled frame base form: {}", other.form_name());
                0
            }
            None => 0,
        };

        Self {
            scope,
            ctx,
            frame_base,
            cu_base,
            cursor: 0,
        }
    }

    /// スコープが見つかったかどうか
    pub fn is_resolved(&self) -> bool {
        self.scope.is_some()
    }

    /// フレームベースを取得する
    pub fn frame_base(&self) -> u64 {
        self.frame_base
    }

    /// コンパイルユニットの開始アドレスを取得する
    pub fn cu_base(&self) -> u64 {
        self.cu_base
    }

    /// 名前で変数を検索する
    ///
    /// 変数・仮引数以外の子は対象外です。見つからなければNoneです。
    pub fn lookup(&self, insp: &Inspector, name: &str) -> Option<VarRef> {
        let tree = insp.tree();
        self.decls(insp)
            .into_iter()
            .find(|die| tree.str_attr(*die, gimli::DW_AT_name) == Some(name))
            .map(|die| self.make_var(insp, die))
    }

    /// 変数・仮引数を宣言順に1つずつ取り出す
    ///
    /// 返り値は(名前, 仮引数かどうか, 変数参照)です。末尾まで達したら
    /// Noneを返し続けます。
    pub fn next_var(&mut self, insp: &Inspector) -> Option<(Option<String>, bool, VarRef)> {
        let decls = self.decls(insp);
        let die = *decls.get(self.cursor)?;
        self.cursor += 1;

        let tree = insp.tree();
        let name = tree
            .str_attr(die, gimli::DW_AT_name)
            .map(|s| s.to_string());
        let is_param = tree.node(die).map(|n| n.tag) == Some(gimli::DW_TAG_formal_parameter);
        Some((name, is_param, self.make_var(insp, die)))
    }

    /// スコープ直下の変数・仮引数ノードを宣言順で集める
    fn decls(&self, insp: &Inspector) -> Vec<NodeId> {
        let Some(scope) = self.scope else {
            return Vec::new();
        };
        let tree = insp.tree();
        tree.children(scope)
            .iter()
            .copied()
            .filter(|kid| {
                matches!(
                    tree.node(*kid).map(|n| n.tag),
                    Some(gimli::DW_TAG_variable) | Some(gimli::DW_TAG_formal_parameter)
                )
            })
            .collect()
    }

    /// 宣言ノードから変数参照を作る
    ///
    /// ロケーション評価に失敗した変数はアドレス0の参照になります。
    fn make_var(&self, insp: &Inspector, die: NodeId) -> VarRef {
        let tree = insp.tree();
        let (addr, is_stack) = match tree.attr(die, gimli::DW_AT_location) {
            Some(AttrValue::Block(expr)) => insp
                .eval()
                .eval_block(&self.ctx, expr, self.frame_base, None)
                .unwrap_or_else(|e| {
                    warn!("failed to evaluate variable location: {}", e);
                    (0, false)
                }),
            Some(AttrValue::LocListRef(offset)) => insp
                .eval()
                .eval_offset(&self.ctx, self.cu_base, tree, *offset)
                .unwrap_or_else(|e| {
                    warn!("failed to evaluate variable location: {}", e);
                    (0, false)
                }),
            Some(other) => {
                warn!("unhandled location form: {}", other.form_name());
                (0, false)
            }
            None => (0, false),
        };

        VarRef {
            ctx: self.ctx.clone(),
            ty: tree.ref_attr(die, gimli::DW_AT_type),
            name: tree
                .str_attr(die, gimli::DW_AT_name)
                .map(|s| s.to_string()),
            addr,
            is_stack,
            frame_base: self.frame_base,
            cu_base: self.cu_base,
        }
    }
}
