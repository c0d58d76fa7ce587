//! スコープとフレームの結合テスト
//!
//! スナップショットからフレームを選び、そのスコープで変数を引くまでの
//! 流れを確認します。

use rindou_core::{Inspector, Threads, VarScope};
use rindou_dwarf::{AttrValue, FrameContext, LocListEntry, MemoryReader, TreeBuilder};
use rindou_target::ThreadSnapshot;
use std::rc::Rc;

const FRAME_BASE: u64 = 0x7fff_0100;

struct FakeMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl MemoryReader for FakeMemory {
    fn read(&self, addr: u64, _is_stack: bool, len: usize) -> anyhow::Result<Vec<u8>> {
        for (base, bytes) in &self.regions {
            if addr >= *base && addr + len as u64 <= *base + bytes.len() as u64 {
                let start = (addr - base) as usize;
                return Ok(bytes[start..start + len].to_vec());
            }
        }
        Err(anyhow::anyhow!("unmapped address 0x{:x}", addr))
    }
}

/// 仮引数"n"と局所変数"x"を持つ関数のコンテキスト
///
/// nはフレームベース-4、xはフレームベース-8に置かれます。
fn inspector(regions: Vec<(u64, Vec<u8>)>) -> Inspector {
    let mut b = TreeBuilder::new();
    let cu = b.add_node(None, gimli::DW_TAG_compile_unit);
    b.set_attr(cu, gimli::DW_AT_low_pc, AttrValue::Addr(0));

    let u32t = b.add_node(Some(cu), gimli::DW_TAG_base_type);
    b.set_attr(u32t, gimli::DW_AT_name, AttrValue::Str("unsigned int".into()));
    b.set_attr(u32t, gimli::DW_AT_byte_size, AttrValue::Udata(4));
    b.set_attr(
        u32t,
        gimli::DW_AT_encoding,
        AttrValue::Udata(gimli::DW_ATE_unsigned.0 as u64),
    );

    let sp = b.add_node(Some(cu), gimli::DW_TAG_subprogram);
    b.set_attr(sp, gimli::DW_AT_name, AttrValue::Str("work".into()));
    b.set_attr(sp, gimli::DW_AT_low_pc, AttrValue::Addr(0x1000));
    b.set_attr(sp, gimli::DW_AT_high_pc, AttrValue::Udata(0x100));
    b.set_attr(
        sp,
        gimli::DW_AT_frame_base,
        AttrValue::Block(vec![gimli::constants::DW_OP_breg6.0, 0x00]),
    );

    let n = b.add_node(Some(sp), gimli::DW_TAG_formal_parameter);
    b.set_attr(n, gimli::DW_AT_name, AttrValue::Str("n".into()));
    b.set_attr(n, gimli::DW_AT_type, AttrValue::Ref(u32t));
    b.set_attr(
        n,
        gimli::DW_AT_location,
        AttrValue::Block(vec![gimli::constants::DW_OP_fbreg.0, 0x7c]),
    );

    let x = b.add_node(Some(sp), gimli::DW_TAG_variable);
    b.set_attr(x, gimli::DW_AT_name, AttrValue::Str("x".into()));
    b.set_attr(x, gimli::DW_AT_type, AttrValue::Ref(u32t));
    b.set_attr(
        x,
        gimli::DW_AT_location,
        AttrValue::Block(vec![gimli::constants::DW_OP_fbreg.0, 0x78]),
    );

    // ロケーションリスト参照の変数"y": PC 0x1000-0x1080ではrbp+16
    let y = b.add_node(Some(sp), gimli::DW_TAG_variable);
    b.set_attr(y, gimli::DW_AT_name, AttrValue::Str("y".into()));
    b.set_attr(y, gimli::DW_AT_type, AttrValue::Ref(u32t));
    b.set_attr(y, gimli::DW_AT_location, AttrValue::LocListRef(0x40));
    b.add_loclist(
        0x40,
        vec![LocListEntry {
            begin: 0x1000,
            end: 0x1080,
            expr: vec![gimli::constants::DW_OP_breg6.0, 0x10],
        }],
    );

    let mem: Rc<dyn MemoryReader> = Rc::new(FakeMemory { regions });
    Inspector::new(b.finish(), mem)
}

fn stopped_thread(signo: Option<i32>) -> ThreadSnapshot {
    let mut ctx = FrameContext::default();
    ctx.pc = 0x1010;
    ctx.regs[FrameContext::FP] = FRAME_BASE;
    ThreadSnapshot {
        tid: 100,
        state: 't',
        frames: vec![ctx.clone(), FrameContext::from_unwind(0x2000, 0, 0)],
        pcs: vec![0x1010, 0x2000],
        signo,
    }
}

#[test]
fn test_frame_scope_lookup() {
    let mut memory = vec![0u8; 8];
    memory[..4].copy_from_slice(&11u32.to_le_bytes()); // x
    memory[4..].copy_from_slice(&5u32.to_le_bytes()); // n
    let insp = inspector(vec![(FRAME_BASE - 8, memory)]);

    let threads = Threads::new(vec![stopped_thread(Some(11))]);
    let thread = threads.get(0).unwrap();
    let frame = thread.frame(0).unwrap();
    assert!(frame.is_signal());

    let scope = frame.scope(&insp);
    assert!(scope.is_resolved());

    let var = scope.lookup(&insp, "n").unwrap();
    assert_eq!(var.addr(), FRAME_BASE - 4);
    assert!(var.is_stack());
    let mut value = var.value();
    assert_eq!(value.render(&insp).unwrap(), "5");
}

#[test]
fn test_scope_enumeration_order_and_exhaustion() {
    let insp = inspector(vec![(FRAME_BASE - 8, vec![0u8; 8])]);
    let threads = Threads::new(vec![stopped_thread(None)]);
    let frame = threads.get(0).unwrap().frame(0).unwrap();
    let mut scope = frame.scope(&insp);

    let (name, is_param, _) = scope.next_var(&insp).unwrap();
    assert_eq!(name.as_deref(), Some("n"));
    assert!(is_param);

    let (name, is_param, _) = scope.next_var(&insp).unwrap();
    assert_eq!(name.as_deref(), Some("x"));
    assert!(!is_param);

    let (name, _, _) = scope.next_var(&insp).unwrap();
    assert_eq!(name.as_deref(), Some("y"));

    // 枯渇後は巻き戻らない
    assert!(scope.next_var(&insp).is_none());
    assert!(scope.next_var(&insp).is_none());
}

#[test]
fn test_loclist_variable() {
    let mut region = vec![0u8; 4];
    region.copy_from_slice(&77u32.to_le_bytes());
    let insp = inspector(vec![(FRAME_BASE + 0x10, region)]);

    let threads = Threads::new(vec![stopped_thread(None)]);
    let frame = threads.get(0).unwrap().frame(0).unwrap();
    let scope = frame.scope(&insp);

    let var = scope.lookup(&insp, "y").unwrap();
    assert_eq!(var.addr(), FRAME_BASE + 0x10);
    let mut value = var.value();
    assert_eq!(value.render(&insp).unwrap(), "77");
}

#[test]
fn test_lookup_miss_is_soft() {
    let insp = inspector(vec![]);
    let threads = Threads::new(vec![stopped_thread(None)]);
    let frame = threads.get(0).unwrap().frame(0).unwrap();
    let scope = frame.scope(&insp);

    assert!(scope.lookup(&insp, "nope").is_none());
}

#[test]
fn test_unknown_pc_yields_empty_scope() {
    let insp = inspector(vec![]);
    let mut ctx = FrameContext::default();
    ctx.pc = 0x9999;
    let mut scope = VarScope::new(&insp, ctx);

    assert!(!scope.is_resolved());
    assert!(scope.lookup(&insp, "x").is_none());
    assert!(scope.next_var(&insp).is_none());
}

#[test]
fn test_outer_frame_scope_is_unresolved() {
    let insp = inspector(vec![]);
    let threads = Threads::new(vec![stopped_thread(None)]);
    let frame = threads.get(0).unwrap().frame(1).unwrap();

    // 0x2000は関数範囲外
    let scope = frame.scope(&insp);
    assert!(!scope.is_resolved());
}
