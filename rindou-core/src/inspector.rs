//! 調査コンテキスト
//!
//! メタデータツリー・メモリリーダー・ロケーション評価器・シンボル/行情報を
//! 束ねたもので、値とスコープの操作はこれを介して行います。

use rindou_dwarf::{ExprEvaluator, LineLookup, LocEval, MemoryReader, MetaTree, SymbolResolver};
use std::rc::Rc;

/// 調査コンテキスト
pub struct Inspector {
    tree: MetaTree,
    mem: Rc<dyn MemoryReader>,
    eval: Box<dyn LocEval>,
    symbols: Option<SymbolResolver>,
    lines: Option<LineLookup>,
    load_bias: u64,
}

impl Inspector {
    /// ツリーとメモリリーダーからコンテキストを作成する
    pub fn new(tree: MetaTree, mem: Rc<dyn MemoryReader>) -> Self {
        let eval = Box::new(ExprEvaluator::new(Rc::clone(&mem)));
        Self {
            tree,
            mem,
            eval,
            symbols: None,
            lines: None,
            load_bias: 0,
        }
    }

    /// ロードバイアスを設定する
    ///
    /// PIEバイナリでは、デバッグ情報中の静的アドレスと実行時アドレスの差を
    /// ここで吸収します。評価器も作り直します。
    pub fn set_load_bias(&mut self, load_bias: u64) {
        self.load_bias = load_bias;
        self.eval = Box::new(ExprEvaluator::with_bias(Rc::clone(&self.mem), load_bias));
    }

    /// シンボル解決器を設定する
    pub fn set_symbols(&mut self, symbols: SymbolResolver) {
        self.symbols = Some(symbols);
    }

    /// ソース行検索を設定する
    pub fn set_lines(&mut self, lines: LineLookup) {
        self.lines = Some(lines);
    }

    /// メタデータツリーを取得する
    pub fn tree(&self) -> &MetaTree {
        &self.tree
    }

    /// メモリリーダーを取得する
    pub fn mem(&self) -> &dyn MemoryReader {
        self.mem.as_ref()
    }

    /// ロケーション評価器を取得する
    pub fn eval(&self) -> &dyn LocEval {
        self.eval.as_ref()
    }

    /// ロードバイアスを取得する
    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// 実行時アドレスをデバッグ情報の座標に変換する
    pub fn debug_pc(&self, pc: u64) -> u64 {
        pc.wrapping_sub(self.load_bias)
    }

    /// PCに対応するシンボル表記("name+0xoff")を取得する
    pub fn symbol_at(&self, pc: u64) -> Option<String> {
        self.symbols.as_ref()?.describe(self.debug_pc(pc))
    }

    /// PCに対応するソース位置を取得する
    pub fn source_at(&self, pc: u64) -> Option<(String, u32)> {
        let info = self.lines.as_ref()?.lookup(self.debug_pc(pc))?;
        Some((info.file, info.line))
    }

    /// パターンにマッチするシンボルを検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<rindou_dwarf::Symbol> {
        self.symbols
            .as_ref()
            .map(|s| s.find_symbols(pattern))
            .unwrap_or_default()
    }
}
