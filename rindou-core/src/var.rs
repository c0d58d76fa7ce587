//! 変数参照
//!
//! スコープ解決済みの変数・メンバの「場所」を表します。実際の読み取りと
//! 型解決は`Value`が担当します。

use crate::errors::AccessError;
use crate::inspector::Inspector;
use crate::value::{resolve_chain, Value};
use crate::Result;
use rindou_dwarf::{resolve_type_name, tag_name, FrameContext, NodeId};

/// 変数参照
///
/// アドレスとスタック領域フラグ、型参照、評価に必要なフレーム情報を
/// 保持します。
#[derive(Debug, Clone)]
pub struct VarRef {
    pub(crate) ctx: FrameContext,
    pub(crate) ty: Option<NodeId>,
    pub(crate) name: Option<String>,
    pub(crate) addr: u64,
    pub(crate) is_stack: bool,
    pub(crate) frame_base: u64,
    pub(crate) cu_base: u64,
}

impl VarRef {
    /// 変数名を取得する
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// アドレスを取得する
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// スタック領域を指しているかどうか
    pub fn is_stack(&self) -> bool {
        self.is_stack
    }

    /// C言語風の型表示名を取得する
    pub fn display_type(&self, insp: &Inspector) -> String {
        resolve_type_name(insp.tree(), self.ty)
    }

    /// 解決後の型タグ名("struct"/"pointer"等)を取得する
    pub fn tag(&self, insp: &Inspector) -> Option<String> {
        let node = resolve_chain(insp.tree(), self.ty)?;
        insp.tree().node(node).map(|n| tag_name(n.tag))
    }

    /// 解決後の型自身の名前を取得する
    pub fn type_name(&self, insp: &Inspector) -> Option<String> {
        let node = resolve_chain(insp.tree(), self.ty)?;
        insp.tree()
            .str_attr(node, gimli::DW_AT_name)
            .map(|s| s.to_string())
    }

    /// ポインタをデリファレンスして指し先の変数参照を作る
    ///
    /// 型の別名連鎖を解決した結果がポインタでなければエラーです。
    /// 指し先は常に絶対アドレスとして扱います。
    pub fn deref(&self, insp: &Inspector) -> Result<VarRef> {
        let tree = insp.tree();
        let node = resolve_chain(tree, self.ty).ok_or(AccessError::Unresolved)?;

        if tree.node(node).map(|n| n.tag) != Some(gimli::DW_TAG_pointer_type) {
            return Err(AccessError::DerefNonPointer.into());
        }
        let pointee = tree
            .ref_attr(node, gimli::DW_AT_type)
            .ok_or(AccessError::DerefVoidPointer)?;

        // ポインタ自体の幅。32bitターゲットのコアでは4バイトになる
        let size = tree.udata(node, gimli::DW_AT_byte_size).unwrap_or(8);
        let target = if size == 4 {
            insp.mem().read_u32(self.addr, self.is_stack)? as u64
        } else {
            insp.mem().read_u64(self.addr, self.is_stack)?
        };

        Ok(VarRef {
            ctx: self.ctx.clone(),
            ty: Some(pointee),
            name: self.name.clone(),
            addr: target,
            is_stack: false,
            frame_base: self.frame_base,
            cu_base: self.cu_base,
        })
    }

    /// この参照の値を作る
    pub fn value(&self) -> Value {
        Value::new(self.clone())
    }
}
