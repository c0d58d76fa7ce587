//! 型の表示名解決

use crate::tree::{MetaTree, NodeId};

/// 型参照から表示用の型名を組み立てる
///
/// 修飾子・typedef・ポインタの連鎖を辿り、"const struct foo *" のような
/// C言語風の表示名を返します。型参照がない場合は"void"です。
pub fn resolve_type_name(tree: &MetaTree, ty: Option<NodeId>) -> String {
    let Some(id) = ty else {
        return "void".to_string();
    };
    let Some(node) = tree.node(id) else {
        return "<unknown>".to_string();
    };

    let inner = tree.ref_attr(id, gimli::DW_AT_type);
    let name = tree.str_attr(id, gimli::DW_AT_name);

    match node.tag {
        gimli::DW_TAG_pointer_type => {
            format!("{} *", resolve_type_name(tree, inner))
        }
        gimli::DW_TAG_const_type => {
            format!("const {}", resolve_type_name(tree, inner))
        }
        gimli::DW_TAG_volatile_type => {
            format!("volatile {}", resolve_type_name(tree, inner))
        }
        // restrict/sharedは表示名に影響しない
        gimli::DW_TAG_restrict_type | gimli::DW_TAG_shared_type => resolve_type_name(tree, inner),
        gimli::DW_TAG_typedef => name
            .map(|s| s.to_string())
            .unwrap_or_else(|| resolve_type_name(tree, inner)),
        gimli::DW_TAG_structure_type => {
            format!("struct {}", name.unwrap_or("<anonymous>"))
        }
        gimli::DW_TAG_union_type => {
            format!("union {}", name.unwrap_or("<anonymous>"))
        }
        gimli::DW_TAG_enumeration_type => {
            format!("enum {}", name.unwrap_or("<anonymous>"))
        }
        gimli::DW_TAG_subroutine_type => "<subroutine>".to_string(),
        _ => name.unwrap_or("<unknown>").to_string(),
    }
}
