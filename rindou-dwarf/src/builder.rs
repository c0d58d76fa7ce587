//! ELF/DWARFの読み込みとメタデータツリーの構築

use crate::tree::{AttrValue, LocListEntry, MetaTree, NodeId, TreeBuilder};
use crate::Result;
use object::{Object, ObjectSection};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

type Reader = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
pub struct DwarfLoader {
    /// オブジェクトファイル
    object_file: Rc<object::File<'static>>,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<Reader>,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // セクションデータに'staticライフタイムを与えるためリークさせる
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> Result<Reader> {
            let data = object_file
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok(gimli::EndianSlice::new(data, endian))
        };

        let dwarf = gimli::Dwarf::load(load_section)
            .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))?;

        Ok(Self {
            object_file: Rc::new(object_file),
            dwarf,
        })
    }

    /// DWARFコンテキストへの参照を取得
    pub fn dwarf(&self) -> &gimli::Dwarf<Reader> {
        &self.dwarf
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIE実行ファイルの場合、デバッグ情報中のアドレスはオフセットであり、
    /// 実行時ベースアドレスを加算する必要があります。
    pub fn is_pie(&self) -> bool {
        use object::ObjectKind;

        // ET_DYN = PIE実行ファイルまたは共有ライブラリ
        matches!(self.object_file.kind(), ObjectKind::Dynamic)
    }
}

/// ツリーに取り込む属性の集合
///
/// 値の解決と名前表示に使うものだけを残し、残りは読み飛ばします。
const KEPT_ATTRS: &[gimli::DwAt] = &[
    gimli::DW_AT_name,
    gimli::DW_AT_type,
    gimli::DW_AT_byte_size,
    gimli::DW_AT_bit_size,
    gimli::DW_AT_bit_offset,
    gimli::DW_AT_encoding,
    gimli::DW_AT_low_pc,
    gimli::DW_AT_high_pc,
    gimli::DW_AT_data_member_location,
    gimli::DW_AT_location,
    gimli::DW_AT_frame_base,
];

/// DWARF情報からメタデータツリーを構築する
///
/// 1パス目で全DIEにノードを割り当てて.debug_infoオフセットとの対応表を作り、
/// 2パス目で属性を変換します。前方参照があるため2パス必要です。
pub fn build_tree(loader: &DwarfLoader) -> Result<MetaTree> {
    let dwarf = loader.dwarf();
    let mut builder = TreeBuilder::new();
    let mut by_offset: HashMap<usize, NodeId> = HashMap::new();
    let mut unit_nodes: Vec<Vec<NodeId>> = Vec::new();

    // 1パス目: ノード確保
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut depth = 0isize;

        let mut entries = unit.entries();
        while let Some((delta, entry)) = entries.next_dfs()? {
            depth += delta;
            stack.truncate(depth.max(0) as usize);
            let parent = stack.last().copied();
            let id = builder.add_node(parent, entry.tag());
            if let Some(goff) = entry.offset().to_debug_info_offset(&unit.header) {
                by_offset.insert(goff.0, id);
            }
            stack.push(id);
            order.push(id);
        }
        unit_nodes.push(order);
    }

    // 2パス目: 属性変換
    let mut units = dwarf.units();
    let mut unit_index = 0;
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let order = &unit_nodes[unit_index];
        unit_index += 1;
        let mut pos = 0;

        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            let id = order[pos];
            pos += 1;

            let mut attrs = entry.attrs();
            while let Some(attr) = attrs.next()? {
                let at = attr.name();
                if !KEPT_ATTRS.contains(&at) {
                    continue;
                }
                let Some(value) = convert_attr(dwarf, &unit, &by_offset, &attr) else {
                    continue;
                };
                // ロケーションリスト参照はこの場で実体化しておく
                if let AttrValue::LocListRef(offset) = value {
                    if at == gimli::DW_AT_location || at == gimli::DW_AT_frame_base {
                        materialize_loclist(dwarf, &unit, offset, &mut builder)?;
                    }
                }
                builder.set_attr(id, at, value);
            }
        }
    }

    let tree = builder.finish();
    debug!("built metadata tree with {} nodes", tree.len());
    Ok(tree)
}

/// DWARF属性値をツリーの属性値に変換する
///
/// 未対応のフォームはNoneを返して読み飛ばします。
fn convert_attr(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    by_offset: &HashMap<usize, NodeId>,
    attr: &gimli::Attribute<Reader>,
) -> Option<AttrValue> {
    use gimli::AttributeValue as V;

    match attr.value() {
        V::Addr(addr) => Some(AttrValue::Addr(addr)),
        V::Udata(u) => Some(AttrValue::Udata(u)),
        V::Data1(v) => Some(AttrValue::Udata(v as u64)),
        V::Data2(v) => Some(AttrValue::Udata(v as u64)),
        V::Data4(v) => Some(AttrValue::Udata(v as u64)),
        V::Data8(v) => Some(AttrValue::Udata(v)),
        V::Sdata(s) => Some(AttrValue::Sdata(s)),
        V::Encoding(e) => Some(AttrValue::Udata(e.0 as u64)),
        V::Exprloc(expr) => Some(AttrValue::Block(expr.0.slice().to_vec())),
        V::Block(data) => Some(AttrValue::Block(data.slice().to_vec())),
        V::SecOffset(offset) => Some(AttrValue::LocListRef(offset as u64)),
        V::LocationListsRef(offset) => Some(AttrValue::LocListRef(offset.0 as u64)),
        V::UnitRef(offset) => offset
            .to_debug_info_offset(&unit.header)
            .and_then(|goff| by_offset.get(&goff.0))
            .copied()
            .map(AttrValue::Ref),
        V::DebugInfoRef(goff) => by_offset.get(&goff.0).copied().map(AttrValue::Ref),
        V::String(_) | V::DebugStrRef(_) | V::DebugLineStrRef(_) | V::DebugStrOffsetsIndex(_) => {
            let s = dwarf.attr_string(unit, attr.value()).ok()?;
            Some(AttrValue::Str(s.to_string_lossy().into_owned()))
        }
        _ => None,
    }
}

/// ロケーションリストをツリーの表に取り込む
///
/// gimliが返す絶対アドレス範囲を、コンパイルユニットのベースアドレスからの
/// 相対値に直して保持します。
fn materialize_loclist(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    offset: u64,
    builder: &mut TreeBuilder,
) -> Result<()> {
    let mut iter = dwarf.locations(unit, gimli::LocationListsOffset(offset as usize))?;
    let mut entries = Vec::new();

    while let Some(entry) = iter.next()? {
        entries.push(LocListEntry {
            begin: entry.range.begin.wrapping_sub(unit.low_pc),
            end: entry.range.end.wrapping_sub(unit.low_pc),
            expr: entry.data.0.slice().to_vec(),
        });
    }

    builder.add_loclist(offset, entries);
    Ok(())
}
