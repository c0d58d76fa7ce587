//! 値の解決と読み取り
//!
//! 変数参照に型解決の状態とビットフィールドの切り出し情報を付けたものが
//! `Value`です。スカラの読み取り、メンバへのナビゲーション、メンバの
//! 列挙を提供します。

use crate::errors::AccessError;
use crate::inspector::Inspector;
use crate::var::VarRef;
use crate::Result;
use rindou_dwarf::{AttrValue, MetaTree, NodeId};
use std::fmt;
use tracing::warn;

/// 型解決の状態
///
/// 解決は一度だけ行われ、以後はキャッシュされたノードを使います。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 未解決
    Unresolved,
    /// 別名連鎖の終端ノード
    Resolved(NodeId),
}

/// 読み取ったスカラ値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarValue {
    Signed(i64),
    Unsigned(u64),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Signed(v) => write!(f, "{}", v),
            ScalarValue::Unsigned(v) => write!(f, "{}", v),
        }
    }
}

/// 型の別名タグかどうか
///
/// これらは実体の型へ透過的に剥がされます。
fn is_alias(tag: gimli::DwTag) -> bool {
    matches!(
        tag,
        gimli::DW_TAG_typedef
            | gimli::DW_TAG_const_type
            | gimli::DW_TAG_volatile_type
            | gimli::DW_TAG_restrict_type
            | gimli::DW_TAG_shared_type
    )
}

/// 別名連鎖を終端まで辿る
///
/// 連鎖の途中で内側の型が欠けている場合は、辿れた最後のノードを終端と
/// します。型参照自体がない、または壊れている場合はNoneです。
pub(crate) fn resolve_chain(tree: &MetaTree, ty: Option<NodeId>) -> Option<NodeId> {
    let mut cur = ty?;
    let mut node = tree.node(cur)?;

    while is_alias(node.tag) {
        let next = tree
            .ref_attr(cur, gimli::DW_AT_type)
            .and_then(|next| tree.node(next).map(|n| (next, n)));
        match next {
            Some((id, n)) => {
                cur = id;
                node = n;
            }
            None => break,
        }
    }
    Some(cur)
}

/// 値
#[derive(Debug)]
pub struct Value {
    var: VarRef,
    resolved: Resolution,
    /// ビットフィールドのマスク。0なら通常のスカラ
    mask: u64,
    /// ビットフィールドの右シフト量
    shift: u32,
    /// メンバ列挙の位置
    cursor: usize,
}

impl Value {
    /// 変数参照から値を作る
    pub fn new(var: VarRef) -> Self {
        Self {
            var,
            resolved: Resolution::Unresolved,
            mask: 0,
            shift: 0,
            cursor: 0,
        }
    }

    /// 元の変数参照を取得する
    pub fn var(&self) -> &VarRef {
        &self.var
    }

    /// ビットフィールドのマスクを取得する
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// ビットフィールドのシフト量を取得する
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// 型を解決する
    ///
    /// 結果はキャッシュされ、2回目以降は辿り直しません。
    pub fn resolve(&mut self, insp: &Inspector) -> Option<NodeId> {
        if let Resolution::Resolved(node) = self.resolved {
            return Some(node);
        }
        let node = resolve_chain(insp.tree(), self.var.ty)?;
        self.resolved = Resolution::Resolved(node);
        Some(node)
    }

    fn resolved_node(&mut self, insp: &Inspector) -> Result<NodeId> {
        self.resolve(insp)
            .ok_or_else(|| AccessError::Unresolved.into())
    }

    /// スカラ値として読み取る
    ///
    /// 基本型・列挙型以外はNoneです。エンコーディングが未指定の場合は
    /// 符号付きとみなします。ビットフィールドはマスクとシフトを生の
    /// 符号なし値に適用してから返します。
    pub fn numeric(&mut self, insp: &Inspector) -> Result<Option<ScalarValue>> {
        let node = self.resolved_node(insp)?;
        let tree = insp.tree();

        match tree.node(node).map(|n| n.tag) {
            Some(gimli::DW_TAG_base_type) | Some(gimli::DW_TAG_enumeration_type) => {}
            _ => return Ok(None),
        }

        let encoding = tree
            .udata(node, gimli::DW_AT_encoding)
            .unwrap_or(gimli::DW_ATE_signed.0 as u64);
        let is_signed = if encoding == gimli::DW_ATE_signed.0 as u64
            || encoding == gimli::DW_ATE_signed_char.0 as u64
        {
            true
        } else if encoding == gimli::DW_ATE_unsigned.0 as u64
            || encoding == gimli::DW_ATE_unsigned_char.0 as u64
        {
            false
        } else {
            // 真偽値・浮動小数点等は整数スカラとして扱わない
            return Ok(None);
        };

        let size = tree.udata(node, gimli::DW_AT_byte_size).unwrap_or(0);
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(AccessError::InvalidByteSize(size).into());
        }

        let bytes = insp
            .mem()
            .read(self.var.addr, self.var.is_stack, size as usize)?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        let raw = u64::from_le_bytes(buf);

        if self.mask != 0 {
            let field = (raw >> self.shift) & self.mask;
            return Ok(Some(if is_signed {
                ScalarValue::Signed(field as i64)
            } else {
                ScalarValue::Unsigned(field)
            }));
        }

        if is_signed {
            // 読み取り幅まで符号拡張する
            let ext = 64 - (size as u32) * 8;
            Ok(Some(ScalarValue::Signed(((raw << ext) as i64) >> ext)))
        } else {
            Ok(Some(ScalarValue::Unsigned(raw)))
        }
    }

    /// 表示用の文字列を取得する
    pub fn render(&mut self, insp: &Inspector) -> Result<String> {
        match self.numeric(insp)? {
            Some(v) => Ok(v.to_string()),
            None => Ok("not numeric".to_string()),
        }
    }

    /// 名前でメンバの値を取得する
    ///
    /// 解決後の型が構造体・共用体でなければエラーです。
    pub fn member(&mut self, insp: &Inspector, name: &str) -> Result<Value> {
        let node = self.resolved_node(insp)?;
        let tree = insp.tree();

        match tree.node(node).map(|n| n.tag) {
            Some(gimli::DW_TAG_structure_type) | Some(gimli::DW_TAG_union_type) => {}
            Some(gimli::DW_TAG_array_type) => return Err(AccessError::ArrayAccess.into()),
            _ => return Err(AccessError::NotAggregate.into()),
        }

        for kid in tree.children_with_tag(node, gimli::DW_TAG_member) {
            if tree.str_attr(kid, gimli::DW_AT_name) == Some(name) {
                return Ok(self.make_child(insp, kid));
            }
        }
        Err(AccessError::NoSuchElement(name.to_string()).into())
    }

    /// メンバを宣言順に1つずつ取り出す
    ///
    /// 集約型以外ではNoneです。末尾まで達したらNoneを返し続けます
    /// （巻き戻しはしません）。
    pub fn next_member(&mut self, insp: &Inspector) -> Result<Option<(Option<String>, Value)>> {
        let node = self.resolved_node(insp)?;
        let tree = insp.tree();

        match tree.node(node).map(|n| n.tag) {
            Some(gimli::DW_TAG_structure_type) | Some(gimli::DW_TAG_union_type) => {}
            _ => return Ok(None),
        }

        let members: Vec<NodeId> = tree.children_with_tag(node, gimli::DW_TAG_member).collect();
        let Some(kid) = members.get(self.cursor).copied() else {
            return Ok(None);
        };
        self.cursor += 1;

        let name = tree
            .str_attr(kid, gimli::DW_AT_name)
            .map(|s| s.to_string());
        Ok(Some((name, self.make_child(insp, kid))))
    }

    /// メンバノードから子の値を作る
    ///
    /// メンバ位置の評価に失敗した場合は警告を出して親のアドレスを
    /// そのまま使います。
    fn make_child(&self, insp: &Inspector, kid: NodeId) -> Value {
        let tree = insp.tree();
        let mut addr = self.var.addr;
        let mut is_stack = self.var.is_stack;

        match tree.attr(kid, gimli::DW_AT_data_member_location) {
            Some(AttrValue::Block(expr)) => {
                match insp
                    .eval()
                    .eval_block(&self.var.ctx, expr, 0, Some((addr, is_stack)))
                {
                    Ok((a, s)) => {
                        addr = a;
                        is_stack = s;
                    }
                    Err(e) => warn!("failed to evaluate member location: {}", e),
                }
            }
            Some(AttrValue::Udata(offset)) => {
                addr = addr.wrapping_add(*offset);
            }
            Some(other) => {
                warn!("unhandled member location form: {}", other.form_name());
            }
            // 位置属性がないメンバは親の先頭に重なる
            None => {}
        }

        let (mask, shift) = bitfield_geometry(tree, kid);
        let name = tree
            .str_attr(kid, gimli::DW_AT_name)
            .map(|s| s.to_string());

        Value {
            var: VarRef {
                ctx: self.var.ctx.clone(),
                ty: tree.ref_attr(kid, gimli::DW_AT_type),
                name,
                addr,
                is_stack,
                frame_base: self.var.frame_base,
                cu_base: self.var.cu_base,
            },
            resolved: Resolution::Unresolved,
            mask,
            shift,
            cursor: 0,
        }
    }
}

/// ビットフィールドのマスクとシフトを計算する
///
/// ビットオフセットは格納単位の最上位ビットからの距離で、最下位ビット位置は
/// lsb = S*8 - 1 - O となります。オフセット属性がない場合は1を仮定します。
/// ジオメトリが矛盾している場合は警告を出して通常スカラとして扱います。
fn bitfield_geometry(tree: &MetaTree, member: NodeId) -> (u64, u32) {
    let Some(bit_size) = tree.udata(member, gimli::DW_AT_bit_size) else {
        return (0, 0);
    };

    let storage = tree
        .udata(member, gimli::DW_AT_byte_size)
        .or_else(|| {
            // メンバ自身になければメンバの型から引く
            let ty = tree.ref_attr(member, gimli::DW_AT_type)?;
            let node = resolve_chain(tree, Some(ty))?;
            tree.udata(node, gimli::DW_AT_byte_size)
        })
        .unwrap_or(0);
    let bit_offset = tree.udata(member, gimli::DW_AT_bit_offset).unwrap_or(1);

    let bits = storage * 8;
    if bits == 0 || bit_offset >= bits || bit_size == 0 {
        warn!(
            "inconsistent bitfield geometry: storage={} bit_size={} bit_offset={}",
            storage, bit_size, bit_offset
        );
        return (0, 0);
    }
    let lsb = bits - 1 - bit_offset;
    if bit_size > lsb + 1 {
        warn!(
            "inconsistent bitfield geometry: storage={} bit_size={} bit_offset={}",
            storage, bit_size, bit_offset
        );
        return (0, 0);
    }

    let shift = (lsb + 1 - bit_size) as u32;
    let mask = 1u64
        .checked_shl(bit_size as u32)
        .map(|v| v - 1)
        .unwrap_or(u64::MAX);
    (mask, shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rindou_dwarf::TreeBuilder;

    fn member_with(
        bit_size: Option<u64>,
        byte_size: Option<u64>,
        bit_offset: Option<u64>,
    ) -> (rindou_dwarf::MetaTree, NodeId) {
        let mut builder = TreeBuilder::new();
        let st = builder.add_node(None, gimli::DW_TAG_structure_type);
        let m = builder.add_node(Some(st), gimli::DW_TAG_member);
        if let Some(v) = bit_size {
            builder.set_attr(m, gimli::DW_AT_bit_size, AttrValue::Udata(v));
        }
        if let Some(v) = byte_size {
            builder.set_attr(m, gimli::DW_AT_byte_size, AttrValue::Udata(v));
        }
        if let Some(v) = bit_offset {
            builder.set_attr(m, gimli::DW_AT_bit_offset, AttrValue::Udata(v));
        }
        (builder.finish(), m)
    }

    #[test]
    fn test_bitfield_geometry() {
        // 4バイト格納、ビット27-29の3ビットフィールド
        let (tree, m) = member_with(Some(3), Some(4), Some(2));
        assert_eq!(bitfield_geometry(&tree, m), (0x7, 27));

        // 1バイト格納の先頭2ビット
        let (tree, m) = member_with(Some(2), Some(1), Some(0));
        assert_eq!(bitfield_geometry(&tree, m), (0x3, 6));
    }

    #[test]
    fn test_bitfield_default_offset_is_one() {
        // オフセット属性がない場合は1とみなす
        let (tree, m) = member_with(Some(3), Some(4), None);
        assert_eq!(bitfield_geometry(&tree, m), (0x7, 28));
    }

    #[test]
    fn test_non_bitfield_member() {
        let (tree, m) = member_with(None, Some(4), None);
        assert_eq!(bitfield_geometry(&tree, m), (0, 0));
    }

    #[test]
    fn test_inconsistent_geometry_degrades() {
        // 格納サイズ不明
        let (tree, m) = member_with(Some(3), None, Some(2));
        assert_eq!(bitfield_geometry(&tree, m), (0, 0));
        // フィールドが格納単位からはみ出す
        let (tree, m) = member_with(Some(40), Some(4), Some(0));
        assert_eq!(bitfield_geometry(&tree, m), (0, 0));
    }

    #[test]
    fn test_resolve_chain_peels_qualifiers() {
        let mut builder = TreeBuilder::new();
        let base = builder.add_node(None, gimli::DW_TAG_base_type);
        let shared = builder.add_node(None, gimli::DW_TAG_shared_type);
        builder.set_attr(shared, gimli::DW_AT_type, AttrValue::Ref(base));
        let restrict = builder.add_node(None, gimli::DW_TAG_restrict_type);
        builder.set_attr(restrict, gimli::DW_AT_type, AttrValue::Ref(shared));
        let tree = builder.finish();

        assert_eq!(resolve_chain(&tree, Some(shared)), Some(base));
        assert_eq!(resolve_chain(&tree, Some(restrict)), Some(base));
    }

    #[test]
    fn test_resolve_chain_stops_at_broken_alias() {
        let mut builder = TreeBuilder::new();
        let base = builder.add_node(None, gimli::DW_TAG_base_type);
        let td = builder.add_node(None, gimli::DW_TAG_typedef);
        builder.set_attr(td, gimli::DW_AT_type, AttrValue::Ref(base));
        let broken = builder.add_node(None, gimli::DW_TAG_typedef);
        let tree = builder.finish();

        assert_eq!(resolve_chain(&tree, Some(td)), Some(base));
        // 内側の型がないtypedefは自分自身が終端
        assert_eq!(resolve_chain(&tree, Some(broken)), Some(broken));
        assert_eq!(resolve_chain(&tree, None), None);
    }
}
