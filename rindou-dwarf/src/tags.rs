//! デバッグタグの表示名

/// 型タグの表示名を取得する
///
/// スクリプトフロントエンドに公開する固定の名前集合です。未知のタグは
/// 生の数値表現にフォールバックします。
pub fn tag_name(tag: gimli::DwTag) -> String {
    let name = match tag {
        gimli::DW_TAG_base_type => "base",
        gimli::DW_TAG_typedef => "typedef",
        gimli::DW_TAG_enumeration_type => "enum",
        gimli::DW_TAG_structure_type => "struct",
        gimli::DW_TAG_union_type => "union",
        gimli::DW_TAG_pointer_type => "pointer",
        gimli::DW_TAG_subroutine_type => "subroutine",
        gimli::DW_TAG_const_type => "const",
        gimli::DW_TAG_array_type => "array",
        gimli::DW_TAG_class_type => "class",
        gimli::DW_TAG_reference_type => "reference",
        gimli::DW_TAG_string_type => "string",
        gimli::DW_TAG_ptr_to_member_type => "ptr_to_member",
        gimli::DW_TAG_set_type => "set",
        gimli::DW_TAG_subrange_type => "subrange",
        gimli::DW_TAG_file_type => "file",
        gimli::DW_TAG_packed_type => "packed",
        gimli::DW_TAG_template_type_parameter => "template_type",
        gimli::DW_TAG_thrown_type => "thrown",
        gimli::DW_TAG_volatile_type => "volatile",
        gimli::DW_TAG_restrict_type => "restrict",
        gimli::DW_TAG_interface_type => "interface",
        gimli::DW_TAG_unspecified_type => "unspecified",
        gimli::DW_TAG_shared_type => "shared",
        other => return format!("tag=0x{:x}", other.0),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags() {
        assert_eq!(tag_name(gimli::DW_TAG_base_type), "base");
        assert_eq!(tag_name(gimli::DW_TAG_pointer_type), "pointer");
        assert_eq!(tag_name(gimli::DW_TAG_shared_type), "shared");
    }

    #[test]
    fn test_unknown_tag_fallback() {
        assert_eq!(tag_name(gimli::DwTag(0x4242)), "tag=0x4242");
    }
}
