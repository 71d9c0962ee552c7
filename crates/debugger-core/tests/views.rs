//! Disassembly and memory view rendering, update brackets, and cursor editing.

use std::cell::Cell;
use std::rc::Rc;

use debugger_core::testing::{ToyCpu, ToyMachine, OP_CALL, OP_RET};
use debugger_core::view::{ATTR_ANCILLARY, ATTR_CHANGED, ATTR_CURRENT, ATTR_DISABLED, ATTR_NORMAL};
use debugger_core::{
    BlobKind, DebugConfig, DebugError, DebugSession, MemoryCursor, RightColumn, ViewCore, ViewId,
    ViewKey, ViewKind, ViewXY,
};
use log as _;
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use sha1 as _;
use thiserror as _;

const DISASM_WIDTH: u32 = 69;
const MEMORY_WIDTH: u32 = 78;

fn running() -> DebugConfig {
    DebugConfig {
        start_stopped: false,
        ..DebugConfig::default()
    }
}

fn call_program() -> ToyCpu {
    ToyCpu::new("maincpu")
        .with_program(0x000, &[OP_CALL, 0, 0x00, 0x01])
        .with_program(0x104, &[OP_RET, 0])
}

fn open(machine: &mut ToyMachine, kind: ViewKind, size: ViewXY) -> (DebugSession, ViewId) {
    let mut session = DebugSession::new(machine, running());
    let id = session.alloc_view(machine, kind).unwrap();
    let (slot, mut ctx) = session.view_mut(machine, id).unwrap();
    slot.set_visible_size(size, &mut ctx);
    (session, id)
}

fn tokens(session: &DebugSession, id: ViewId, row: u32) -> Vec<String> {
    session
        .view(id)
        .unwrap()
        .core()
        .row_text(row)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[test]
fn disassembly_rows_show_address_mnemonic_and_bytes() {
    let mut machine = ToyMachine::new(vec![call_program()]);
    let (session, id) = open(&mut machine, ViewKind::Disassembly, ViewXY::new(DISASM_WIDTH, 4));
    let core = session.view(id).unwrap().core();
    assert_eq!(core.total_size(), ViewXY::new(DISASM_WIDTH, 1000));
    assert_eq!(core.row_text(0), format!(" 0000  {:<50} 0002 0100  ", "call 0100"));
    assert_eq!(tokens(&session, id, 1), vec!["0004", "nop", "0000"]);
    assert_eq!(tokens(&session, id, 3), vec!["0008", "nop", "0000"]);
}

#[test]
fn disassembly_marks_the_pc_and_breakpoint_rows() {
    let mut machine = ToyMachine::new(vec![call_program()]);
    let (mut session, id) = open(&mut machine, ViewKind::Disassembly, ViewXY::new(DISASM_WIDTH, 4));
    session.breakpoint_set(&mut machine, 0, 0x4, None, None).unwrap();
    let disabled = session.breakpoint_set(&mut machine, 0, 0x6, None, None).unwrap();
    assert!(session.breakpoint_enable(&mut machine, disabled, false));
    session.update_all_views(&mut machine, Some(ViewKind::Disassembly));

    let core = session.view(id).unwrap().core();
    assert_eq!(core.row(0)[10].attrib, ATTR_CURRENT);
    assert_eq!(core.row(0)[0].attrib, ATTR_CURRENT | ATTR_ANCILLARY);
    assert_eq!(core.row(1)[10].attrib, ATTR_CHANGED);
    assert_eq!(core.row(2)[10].attrib, ATTR_DISABLED);
    assert_eq!(core.row(3)[10].attrib, ATTR_NORMAL);
    assert_eq!(core.row(3)[60].attrib, ATTR_ANCILLARY);
}

#[test]
fn disassembly_scans_back_from_the_home_address() {
    let mut machine = ToyMachine::new(vec![call_program()]);
    let (mut session, id) = open(&mut machine, ViewKind::Disassembly, ViewXY::new(DISASM_WIDTH, 6));
    let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
    let view = slot.as_disassembly_mut().unwrap();
    view.set_expression("100", &mut ctx);
    assert_eq!(view.behavior().row_address(0), Some(0xFA));
    assert_eq!(view.behavior().row_address(3), Some(0x100));
    assert_eq!(view.core().row_text(5).split_whitespace().nth(1), Some("ret"));

    view.handle_key(ViewKey::CtrlHome, &mut ctx);
    view.handle_key(ViewKey::Down, &mut ctx);
    assert_eq!(view.selected_address(), Some(0xFC));
}

#[test]
fn disassembly_comment_column() {
    let mut machine = ToyMachine::new(vec![call_program()]);
    let (mut session, id) = open(&mut machine, ViewKind::Disassembly, ViewXY::new(120, 2));
    session.comment_add(&mut machine, 0, 0x0, "enter").unwrap();
    let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
    let view = slot.as_disassembly_mut().unwrap();
    view.set_right_column(RightColumn::Comments, &mut ctx);
    assert_eq!(view.core().total_size().x, 58 + 1 + 50);
    assert!(view.core().row_text(0).trim_end().ends_with(&format!("{:<50} // enter", "call 0100")));
}

#[test]
fn nested_update_brackets_recompute_once() {
    let mut machine = ToyMachine::new(vec![call_program()]);
    let (mut session, id) = open(&mut machine, ViewKind::Disassembly, ViewXY::new(DISASM_WIDTH, 4));
    let presented = Rc::new(Cell::new(0));
    {
        let counter = Rc::clone(&presented);
        let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
        slot.set_presentation(Some(Box::new(move |_core: &ViewCore| counter.set(counter.get() + 1))));
        let view = slot.as_disassembly_mut().unwrap();
        let before = view.core().recompute_count();
        view.begin_update();
        view.set_right_column(RightColumn::None, &mut ctx);
        view.set_backward_steps(1, &mut ctx);
        view.set_disasm_width(20, &mut ctx);
        assert_eq!(view.core().recompute_count(), before);
        view.end_update(&mut ctx);
        assert_eq!(view.core().recompute_count(), before + 1);
        assert!(view.core().refresh_owed());
    }
    session.flush_view_updates();
    session.flush_view_updates();
    assert_eq!(presented.get(), 1);
    assert!(!session.view(id).unwrap().core().refresh_owed());
}

#[test]
fn memory_rows_show_chunks_and_ascii() {
    let mut cpu = ToyCpu::new("maincpu");
    cpu.memory.load(0, 0, b"Hello");
    let mut machine = ToyMachine::new(vec![cpu]);
    let (session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    let mut expected = vec!["0000", "6548", "6C6C", "006F"];
    expected.extend(["0000"; 5]);
    expected.push("Hello...........");
    assert_eq!(tokens(&session, id, 0), expected);
    assert_eq!(tokens(&session, id, 1)[0], "0010");

    let core = session.view(id).unwrap().core();
    assert_eq!(core.total_size(), ViewXY::new(MEMORY_WIDTH, 0x1000));
    assert_eq!(core.cursor_position(), ViewXY::new(12, 0));
    assert_eq!(core.row(0)[12].attrib, ATTR_NORMAL);
    assert_eq!(core.row(0)[0].attrib, ATTR_ANCILLARY);
}

#[test]
fn reversed_memory_rows_mirror_the_chunks_and_keep_the_cursor() {
    let mut cpu = ToyCpu::new("maincpu");
    cpu.memory.load(0, 0, b"Hello");
    let mut machine = ToyMachine::new(vec![cpu]);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    {
        let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
        let view = slot.as_memory_mut().unwrap();
        view.handle_key(ViewKey::CtrlRight, &mut ctx);
        view.set_reverse(true, &mut ctx);
        assert!(view.behavior().is_reversed());
        assert_eq!(view.core().total_size(), ViewXY::new(MEMORY_WIDTH, 0x1000));
        assert_eq!(view.cursor(), MemoryCursor { address: 0x2, shift: 12 });
        assert_eq!(view.core().cursor_position(), ViewXY::new(56, 0));

        view.set_cursor_position(ViewXY::new(19, 0), &mut ctx);
        assert_eq!(view.cursor(), MemoryCursor { address: 0xE, shift: 12 });
        assert_eq!(view.core().cursor_position(), ViewXY::new(20, 0));
    }
    let mut expected = vec!["Hello..........."];
    expected.extend(["0000"; 5]);
    expected.extend(["006F", "6C6C", "6548", "0000"]);
    assert_eq!(tokens(&session, id, 0), expected);
    let core = session.view(id).unwrap().core();
    assert_eq!(core.row(0)[1].attrib, ATTR_ANCILLARY);
    assert_eq!(core.row(0)[20].attrib, ATTR_NORMAL);
}

#[test]
fn typing_hex_digits_edits_memory_under_the_cursor() {
    let mut cpu = ToyCpu::new("maincpu");
    cpu.memory.load(0, 0, b"He");
    let mut machine = ToyMachine::new(vec![cpu]);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    {
        let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
        let view = slot.as_memory_mut().unwrap();
        assert_eq!(view.cursor(), MemoryCursor { address: 0, shift: 12 });
        view.handle_key(ViewKey::Char('a'), &mut ctx);
        assert_eq!(view.cursor(), MemoryCursor { address: 0, shift: 8 });
        assert_eq!(view.core().cursor_position().x, 13);
        view.handle_key(ViewKey::Char('z'), &mut ctx);
        assert_eq!(view.cursor().shift, 8);
    }
    assert_eq!(machine.cpus[0].memory.peek(0, 1), 0xA5);
    assert_eq!(machine.cpus[0].memory.peek(0, 0), b'H');
    assert_eq!(tokens(&session, id, 0)[1], "A548");
}

#[rstest]
#[case(ViewKey::Right, MemoryCursor { address: 0x0, shift: 8 })]
#[case(ViewKey::End, MemoryCursor { address: 0xE, shift: 0 })]
#[case(ViewKey::Down, MemoryCursor { address: 0x10, shift: 12 })]
#[case(ViewKey::CtrlRight, MemoryCursor { address: 0x2, shift: 12 })]
#[case(ViewKey::Up, MemoryCursor { address: 0x0, shift: 12 })]
fn cursor_keys_move_by_nibble_chunk_and_row(#[case] key: ViewKey, #[case] expected: MemoryCursor) {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu")]);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
    let view = slot.as_memory_mut().unwrap();
    view.handle_key(key, &mut ctx);
    assert_eq!(view.cursor(), expected);
}

#[test]
fn memory_expression_scrolls_to_the_home_row() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu")]);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
    let view = slot.as_memory_mut().unwrap();
    view.set_expression("20", &mut ctx);
    assert_eq!(view.core().visible_position().y, 2);
    assert_eq!(view.cursor(), MemoryCursor { address: 0x20, shift: 12 });
    assert_eq!(view.cursor_address(), 0x20);
    assert_eq!(view.core().row_text(0).split_whitespace().next(), Some("0020"));
}

#[test]
fn memory_sources_include_blobs() {
    let mut data = b"ABCD".to_vec();
    data.resize(32, 0);
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu")]).with_blob("gfx", BlobKind::Region, 1, data);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    {
        let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
        let view = slot.as_memory_mut().unwrap();
        assert_eq!(view.source_count(), 2);
        assert_eq!(view.source_name(0), Some("Toy CPU 'maincpu' program space memory"));
        assert_eq!(view.source_name(1), Some("Region 'gfx'"));
        assert_eq!(view.source_for_device(0), Some(0));
        view.set_source(1, &mut ctx);
        assert_eq!(view.behavior().chunk_size(), 1);
        assert_eq!(view.behavior().chunks_per_row(), 16);
        assert_eq!(view.core().total_size().y, 2);
    }
    let row = tokens(&session, id, 0);
    assert_eq!(&row[..6], &["00", "41", "42", "43", "44", "00"]);
    assert_eq!(row.last().map(String::as_str), Some("ABCD............"));
    assert!(tokens(&session, id, 2).is_empty());
}

#[test]
fn memory_chunk_sizes_are_validated() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu")]);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    let (slot, mut ctx) = session.view_mut(&mut machine, id).unwrap();
    let view = slot.as_memory_mut().unwrap();
    assert!(matches!(view.set_chunk_size(3, &mut ctx), Err(DebugError::UnsupportedChunkSize(3))));
    view.set_chunk_size(4, &mut ctx).unwrap();
    assert_eq!(view.behavior().chunk_size(), 4);
    view.set_chunk_size(1, &mut ctx).unwrap();
    assert_eq!(view.behavior().chunk_size(), 1);
}

#[rstest]
#[case(ViewKind::Disassembly)]
#[case(ViewKind::Memory)]
fn views_need_something_to_show(#[case] kind: ViewKind) {
    let mut machine = ToyMachine::new(Vec::new());
    let mut session = DebugSession::new(&mut machine, running());
    assert!(matches!(session.alloc_view(&mut machine, kind), Err(DebugError::NoSources(k)) if k == kind));
}

#[test]
fn freed_views_are_gone() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu")]);
    let (mut session, id) = open(&mut machine, ViewKind::Memory, ViewXY::new(MEMORY_WIDTH, 3));
    assert!(session.free_view(id));
    assert!(!session.free_view(id));
    assert!(session.view(id).is_none());
}
