//! Rindou デバッグ情報メタデータ解析
//!
//! このクレートは、DWARFデバッグ情報のメタデータツリー（DIEノード/属性グラフ）と、
//! ロケーション式評価・シンボル解決・ソース行検索の機能を提供します。
//! ターゲットメモリ読み取りは`MemoryReader`トレイト経由で外部から注入されます。

pub mod tree;
pub mod tags;
pub mod types;
pub mod context;
pub mod reader;
pub mod loc;
pub mod builder;
pub mod symbols;
pub mod lines;

pub use tree::{AttrValue, LocListEntry, MetaTree, Node, NodeId, TreeBuilder};
pub use tags::tag_name;
pub use types::resolve_type_name;
pub use context::FrameContext;
pub use reader::MemoryReader;
pub use loc::{ExprEvaluator, LocEval};
pub use builder::{build_tree, DwarfLoader};
pub use symbols::{Symbol, SymbolResolver};
pub use lines::{LineInfo, LineLookup};

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
