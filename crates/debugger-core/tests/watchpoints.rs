//! Watchpoint hit tests through the memory hooks and through executed stores.

use debugger_core::testing::{ToyCpu, ToyMachine, OP_STORE};
use debugger_core::{AccessKind, DebugConfig, DebugSession, SpaceRef, WatchKind};
use log as _;
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use sha1 as _;
use thiserror as _;

const PROGRAM: SpaceRef = SpaceRef::program(0);

fn running() -> DebugConfig {
    DebugConfig {
        start_stopped: false,
        ..DebugConfig::default()
    }
}

fn setup(cpu: ToyCpu) -> (ToyMachine, DebugSession) {
    let mut machine = ToyMachine::new(vec![cpu]);
    let session = DebugSession::new(&mut machine, running());
    (machine, session)
}

#[test]
fn write_watchpoints_report_size_address_and_data() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    let index = session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Write, 0x100, 4, None, None)
        .unwrap();
    assert_eq!(index, 1);
    assert_eq!(machine.cpus[0].memory.watch_enables(0), (false, true));
    assert!(session.watch_enabled(PROGRAM, AccessKind::Write));
    assert!(!session.watch_enabled(PROGRAM, AccessKind::Read));

    session.memory_write_hook(&mut machine, PROGRAM, 0x102, 0xBEEF, 0xFFFF);
    assert!(session.is_stopped());
    assert!(machine.printed("Stopped at watchpoint 1 writing word to 00000102 (PC=0) (data=BEEF)"));
}

#[rstest]
#[case(0x104)]
#[case(0x0FE)]
fn accesses_outside_the_range_do_not_hit(#[case] address: u64) {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Write, 0x100, 4, None, None)
        .unwrap();
    session.memory_write_hook(&mut machine, PROGRAM, address, 0x1111, 0xFFFF);
    assert!(!session.is_stopped());
    assert!(machine.output.is_empty());
}

#[test]
fn lane_masks_narrow_the_access() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Write, 0x101, 1, None, None)
        .unwrap();
    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0x00FF, 0x00FF);
    assert!(!session.is_stopped());

    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0xAB00, 0xFF00);
    assert!(session.is_stopped());
    assert!(machine.printed("writing byte to 00000101 (PC=0) (data=AB)"));
}

#[test]
fn executed_stores_stop_before_the_next_instruction() {
    let mut cpu = ToyCpu::new("maincpu").with_program(0, &[OP_STORE, 0, 0x02, 0x01]);
    cpu.regs[0] = 0x1234;
    let (mut machine, mut session) = setup(cpu);
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Write, 0x102, 2, None, None)
        .unwrap();
    machine.run_slice(&mut session, 0, 8);
    assert_eq!(machine.stops, vec![4]);
    assert!(machine.printed("(data=1234)"));
    assert_eq!(machine.cpus[0].memory.peek(0, 0x102), 0x34);
}

#[test]
fn disabling_the_last_watchpoint_drops_the_enables() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    let index = session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::ReadWrite, 0x100, 2, None, None)
        .unwrap();
    assert_eq!(machine.cpus[0].memory.watch_enables(0), (true, true));
    assert!(session.watchpoint_enable(&mut machine, index, false));
    assert_eq!(machine.cpus[0].memory.watch_enables(0), (false, false));
    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0, 0xFFFF);
    assert!(!session.is_stopped());

    assert!(session.watchpoint_clear(&mut machine, index));
    assert!(!session.watchpoint_clear(&mut machine, index));
    assert_eq!(session.controller(0).unwrap().watchpoints(0).count(), 0);
}

#[test]
fn read_watchpoints_omit_the_data() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Read, 0x100, 2, None, None)
        .unwrap();
    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0, 0xFFFF);
    assert!(!session.is_stopped());
    session.memory_read_hook(&mut machine, PROGRAM, 0x100, 0xFFFF);
    assert!(machine.printed("Stopped at watchpoint 1 reading word from 00000100 (PC=0)"));
}

#[test]
fn conditions_see_the_written_data() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Write, 0x100, 2, Some("wpdata == BEEF"), None)
        .unwrap();
    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0x1234, 0xFFFF);
    assert!(!session.is_stopped());
    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0xBEEF, 0xFFFF);
    assert!(session.is_stopped());
    assert_eq!(session.evaluate(&mut machine, "wpaddr").unwrap(), 0x100);
}

#[test]
fn watchpoint_actions_can_resume() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::Write, 0x100, 2, None, Some("go"))
        .unwrap();
    session.memory_write_hook(&mut machine, PROGRAM, 0x100, 0x1, 0xFFFF);
    assert!(!session.is_stopped());
    assert_eq!(machine.executed, vec!["go"]);
    assert!(!machine.printed("Stopped at watchpoint"));
}

#[test]
fn debugger_accesses_are_flagged_on_the_bus() {
    let (mut machine, mut session) = setup(ToyCpu::new("maincpu"));
    session
        .watchpoint_set(&mut machine, PROGRAM, WatchKind::ReadWrite, 0x100, 2, None, None)
        .unwrap();
    session.write_memory(&mut machine, PROGRAM, 0x100, 2, 0x5555, true).unwrap();
    assert_eq!(session.read_memory(&mut machine, PROGRAM, 0x100, 2, true).unwrap(), 0x5555);
    assert!(machine.cpus[0].memory.debugger_access_count(0) >= 2);
    assert!(!machine.cpus[0].memory.debugger_access(0));
    assert!(!session.is_stopped());
}
