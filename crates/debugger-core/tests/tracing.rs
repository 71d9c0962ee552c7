//! Tracer, hotspot, and comment behavior observed through a running session.

use debugger_core::testing::{ToyCpu, ToyMachine, OP_CALL, OP_JMP, OP_RET};
use debugger_core::{DebugConfig, DebugSession, SharedTraceBuffer, SpaceRef};
use log as _;
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use sha1 as _;
use thiserror as _;

fn running() -> DebugConfig {
    DebugConfig {
        start_stopped: false,
        ..DebugConfig::default()
    }
}

/// `call 0100` at 0 with a two-`nop` subroutine returning from 0x104.
fn call_program() -> ToyCpu {
    ToyCpu::new("maincpu")
        .with_program(0x000, &[OP_CALL, 0, 0x00, 0x01])
        .with_program(0x104, &[OP_RET, 0])
}

fn traced(cpu: ToyCpu, trace_over: bool, action: Option<&str>) -> (ToyMachine, DebugSession, SharedTraceBuffer) {
    let mut machine = ToyMachine::new(vec![cpu]);
    let mut session = DebugSession::new(&mut machine, running());
    let buffer = SharedTraceBuffer::new();
    session
        .trace_to(0, Some(Box::new(buffer.clone())), trace_over, action)
        .unwrap();
    (machine, session, buffer)
}

#[rstest]
#[case(false, &["0000: call 0100", "0100: nop", "0102: nop", "0104: ret", "0004: nop", "0006: nop"])]
#[case(true, &["0000: call 0100", "0004: nop", "0006: nop"])]
fn traces_one_line_per_instruction(#[case] trace_over: bool, #[case] expected: &[&str]) {
    let (mut machine, mut session, buffer) = traced(call_program(), trace_over, None);
    machine.run_slice(&mut session, 0, 6);
    assert_eq!(buffer.lines(), expected);
}

#[test]
fn tight_loops_are_summarized_when_they_exit() {
    let mut cpu = ToyCpu::new("maincpu").with_program(0x10, &[OP_JMP, 0, 0x10, 0x00]);
    cpu.pc = 0x10;
    let (mut machine, mut session, buffer) = traced(cpu, false, None);
    machine.run_slice(&mut session, 0, 12);
    machine.cpus[0].memory.load(0, 0x10, &[0; 4]);
    machine.run_slice(&mut session, 0, 2);

    let text = buffer.contents();
    assert!(text.starts_with("0010: jmp 0010\n0010: jmp 0010\n"));
    assert!(text.ends_with("\n   (loops for 11 instructions)\n\n0012: nop\n"));
}

#[test]
fn trace_actions_run_for_each_line() {
    let (mut machine, mut session, buffer) = traced(ToyCpu::new("maincpu"), false, Some("print tick"));
    machine.run_slice(&mut session, 0, 3);
    assert_eq!(machine.output, vec!["tick", "tick", "tick"]);
    assert_eq!(buffer.lines().len(), 3);
}

#[test]
fn tracing_stops_when_the_sink_is_removed() {
    let (mut machine, mut session, buffer) = traced(ToyCpu::new("maincpu"), false, None);
    machine.run_slice(&mut session, 0, 2);
    session.trace_to(0, None, false, None).unwrap();
    machine.run_slice(&mut session, 0, 2);
    assert_eq!(buffer.lines(), vec!["0000: nop", "0002: nop"]);
    assert!(session.controller(0).unwrap().tracer().is_none());
    assert!(session.trace_to(3, None, false, None).is_err());
}

#[test]
fn hotspots_report_entries_evicted_above_the_threshold() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu")]);
    let mut session = DebugSession::new(&mut machine, running());
    session.track_hotspots(&mut machine, 0, 1, 1).unwrap();
    assert_eq!(machine.cpus[0].memory.watch_enables(0), (true, false));

    let program = SpaceRef::program(0);
    for _ in 0..3 {
        session.memory_read_hook(&mut machine, program, 0x10, 0xFFFF);
    }
    session.memory_read_hook(&mut machine, program, 0x20, 0xFFFF);
    assert!(machine.printed("Hotspot @ program 00000010 (PC=00000000) hit 3 times (fell off bottom)"));

    session.memory_read_hook(&mut machine, program, 0x30, 0xFFFF);
    assert_eq!(machine.output.len(), 1);

    session.track_hotspots(&mut machine, 0, 0, 0).unwrap();
    assert!(session.controller(0).unwrap().hotspots().is_none());
    assert_eq!(machine.cpus[0].memory.watch_enables(0), (false, false));
}

#[test]
fn comments_follow_the_opcode_bytes() {
    let mut machine = ToyMachine::new(vec![call_program()]);
    let mut session = DebugSession::new(&mut machine, running());
    session.comment_add(&mut machine, 0, 0x0, "enter subroutine").unwrap();
    assert_eq!(session.comment_text(&mut machine, 0, 0x0).as_deref(), Some("enter subroutine"));
    assert_eq!(session.comment_text(&mut machine, 0, 0x4), None);

    machine.cpus[0].memory.poke(0, 0x2, 0x02);
    assert_eq!(session.comment_text(&mut machine, 0, 0x0), None);
    machine.cpus[0].memory.poke(0, 0x2, 0x00);
    assert!(session.comment_remove(&mut machine, 0, 0x0));
    assert_eq!(session.comment_text(&mut machine, 0, 0x0), None);
    assert!(session.comment_add(&mut machine, 5, 0x0, "nowhere").is_err());
}
