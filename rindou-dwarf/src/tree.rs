//! メタデータツリー
//!
//! コンパイラが出力した型・変数・スコープの記述を、タグ付きノードと名前付き属性の
//! アリーナとして保持します。ツリーの構築は外部のビルダー（`builder`モジュール、
//! またはテスト）が行い、ここでは参照と探索のみを提供します。

use std::collections::HashMap;

/// ツリー内ノードの識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// 属性値
///
/// DWARFのフォームを簡約した表現です。エンコーディングや各種サイズは`Udata`、
/// 型参照は`Ref`、ロケーション式は`Block`、ロケーションリスト参照（オフセット
/// フォーム）は`LocListRef`として保持します。
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// 符号なし定数
    Udata(u64),
    /// 符号付き定数
    Sdata(i64),
    /// 文字列
    Str(String),
    /// 別ノードへの参照
    Ref(NodeId),
    /// ターゲットアドレス
    Addr(u64),
    /// ロケーション式（ブロックフォーム）
    Block(Vec<u8>),
    /// ロケーションリストへのオフセット（オフセットフォーム）
    LocListRef(u64),
}

impl AttrValue {
    /// ログ表示用のフォーム名を取得する
    pub fn form_name(&self) -> &'static str {
        match self {
            AttrValue::Udata(_) => "udata",
            AttrValue::Sdata(_) => "sdata",
            AttrValue::Str(_) => "string",
            AttrValue::Ref(_) => "ref",
            AttrValue::Addr(_) => "addr",
            AttrValue::Block(_) => "block",
            AttrValue::LocListRef(_) => "loclist",
        }
    }
}

/// ロケーションリストの1エントリ
///
/// `begin`/`end`はコンパイルユニットのベースアドレスからの相対値です。
#[derive(Debug, Clone)]
pub struct LocListEntry {
    pub begin: u64,
    pub end: u64,
    pub expr: Vec<u8>,
}

/// メタデータツリーのノード
#[derive(Debug, Clone)]
pub struct Node {
    /// DWARFタグ
    pub tag: gimli::DwTag,
    attrs: Vec<(gimli::DwAt, AttrValue)>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// メタデータツリー
///
/// ノードのアリーナと、オフセットフォームの解決に使うロケーションリスト表を
/// 保持します。コンパイルユニットごとのルートを持つフォレストです。
#[derive(Debug, Default)]
pub struct MetaTree {
    nodes: Vec<Node>,
    loclists: HashMap<u64, Vec<LocListEntry>>,
}

impl MetaTree {
    /// ノード数を取得する
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// ツリーが空かどうか
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// ノードを取得する
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// ノードの親を取得する
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    /// ノードの子を宣言順で取得する
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// 指定タグの子だけを宣言順で列挙する
    pub fn children_with_tag(
        &self,
        id: NodeId,
        tag: gimli::DwTag,
    ) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |kid| self.node(*kid).map(|n| n.tag == tag).unwrap_or(false))
    }

    /// 属性を種別で取得する
    pub fn attr(&self, id: NodeId, at: gimli::DwAt) -> Option<&AttrValue> {
        self.node(id)?
            .attrs
            .iter()
            .find(|(name, _)| *name == at)
            .map(|(_, value)| value)
    }

    /// 属性を符号なし整数として取得する
    pub fn udata(&self, id: NodeId, at: gimli::DwAt) -> Option<u64> {
        match self.attr(id, at)? {
            AttrValue::Udata(u) => Some(*u),
            AttrValue::Sdata(s) if *s >= 0 => Some(*s as u64),
            AttrValue::Addr(a) => Some(*a),
            _ => None,
        }
    }

    /// 属性を文字列として取得する
    pub fn str_attr(&self, id: NodeId, at: gimli::DwAt) -> Option<&str> {
        match self.attr(id, at)? {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 属性をノード参照として取得する
    pub fn ref_attr(&self, id: NodeId, at: gimli::DwAt) -> Option<NodeId> {
        match self.attr(id, at)? {
            AttrValue::Ref(target) => Some(*target),
            _ => None,
        }
    }

    /// ロケーションリストを取得する
    pub fn loclist(&self, offset: u64) -> Option<&[LocListEntry]> {
        self.loclists.get(&offset).map(|entries| entries.as_slice())
    }

    /// PCを含む関数スコープを検索する
    ///
    /// 低アドレス/高アドレス属性がPCを含むサブプログラムノードのうち、
    /// 最も内側（開始アドレスが最大）のものを返します。
    pub fn find_scope_at_pc(&self, pc: u64) -> Option<NodeId> {
        let mut best: Option<(u64, NodeId)> = None;

        for index in 0..self.nodes.len() {
            let id = NodeId(index);
            if self.nodes[index].tag != gimli::DW_TAG_subprogram {
                continue;
            }
            let Some(low) = self.udata(id, gimli::DW_AT_low_pc) else {
                continue;
            };
            let high = match self.attr(id, gimli::DW_AT_high_pc) {
                Some(AttrValue::Addr(addr)) => *addr,
                // high_pcは低アドレスからのオフセットの場合がある
                Some(AttrValue::Udata(offset)) => low + offset,
                _ => continue,
            };
            if pc >= low && pc < high && best.map_or(true, |(best_low, _)| low >= best_low) {
                best = Some((low, id));
            }
        }

        best.map(|(_, id)| id)
    }
}

/// メタデータツリーのビルダー
///
/// ELF/DWARFビルダーとテストの両方から使用されます。
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
    loclists: HashMap<u64, Vec<LocListEntry>>,
}

impl TreeBuilder {
    /// 新しいビルダーを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// ノードを追加する
    ///
    /// `parent`が指定されていれば、その子リストの末尾（宣言順の最後）に追加します。
    pub fn add_node(&mut self, parent: Option<NodeId>, tag: gimli::DwTag) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag,
            attrs: Vec::new(),
            children: Vec::new(),
            parent,
        });
        if let Some(parent) = parent {
            if let Some(node) = self.nodes.get_mut(parent.0) {
                node.children.push(id);
            }
        }
        id
    }

    /// 属性を設定する
    pub fn set_attr(&mut self, id: NodeId, at: gimli::DwAt, value: AttrValue) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.attrs.push((at, value));
        }
    }

    /// ロケーションリストを登録する
    pub fn add_loclist(&mut self, offset: u64, entries: Vec<LocListEntry>) {
        self.loclists.insert(offset, entries);
    }

    /// ツリーを完成させる
    pub fn finish(self) -> MetaTree {
        MetaTree {
            nodes: self.nodes,
            loclists: self.loclists,
        }
    }
}
