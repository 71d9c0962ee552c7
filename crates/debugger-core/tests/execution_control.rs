//! Run/stop state machine coverage driven through the toy machine's scheduler loop.

use debugger_core::testing::{ToyCpu, ToyMachine, OP_CALL, OP_JMP, OP_RET};
use debugger_core::{
    Breakpoint, DebugConfig, DebugSession, ExecutionState, StepMode, DEFAULT_STEP_OUT_BUDGET,
};
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

/// `call 0100` at 0, a subroutine of two `nop`s and a `ret` at 0x104, `nop`s everywhere else.
fn call_program() -> ToyCpu {
    ToyCpu::new("maincpu")
        .with_program(0x000, &[OP_CALL, 0, 0x00, 0x01])
        .with_program(0x104, &[OP_RET, 0])
}

fn machine(cpu: ToyCpu) -> ToyMachine {
    ToyMachine::new(vec![cpu])
}

#[test]
fn start_stopped_enters_the_wait_loop_before_the_first_instruction() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    assert!(session.is_stopped());
    assert!(session.should_call_instruction_hook(0));
    machine.run_slice(&mut session, 0, 4);
    assert_eq!(machine.stops, vec![0]);
    assert_eq!(machine.executed, vec!["go"]);
    assert!(!machine.muted);
    assert!(!session.is_stopped());
}

#[rstest]
#[case(1, 0x2)]
#[case(3, 0x6)]
#[case(10, 0x14)]
fn single_step_stops_after_exactly_n_instructions(#[case] count: u32, #[case] stop_pc: u64) {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    let command = format!("step {count}");
    machine.queue(&[command.as_str()]);
    machine.run_slice(&mut session, 0, 32);
    assert_eq!(machine.stops, vec![0, stop_pc]);
}

#[test]
fn step_over_treats_a_call_as_one_instruction() {
    let mut machine = machine(call_program());
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    session.breakpoint_set(&mut machine, 0, 0x102, None, None).unwrap();
    machine.queue(&["over"]);
    machine.run_slice(&mut session, 0, 16);
    assert_eq!(machine.stops, vec![0, 4]);
    assert!(!machine.printed("Stopped at breakpoint"));
}

#[test]
fn single_step_enters_the_callee() {
    let mut machine = machine(call_program());
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["step"]);
    machine.run_slice(&mut session, 0, 16);
    assert_eq!(machine.stops, vec![0, 0x100]);
}

#[test]
fn step_out_runs_to_the_instruction_after_the_return() {
    let mut machine = machine(call_program());
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["step", "out"]);
    machine.run_slice(&mut session, 0, 16);
    assert_eq!(machine.stops, vec![0, 0x100, 4]);
}

#[test]
fn step_out_without_a_disassembler_keeps_running() {
    let mut machine = machine(call_program().without_disassembler());
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["step", "out"]);
    machine.run_slice(&mut session, 0, 16);
    assert_eq!(machine.stops, vec![0, 0x100]);
    assert!(!session.is_stopped());
    assert_eq!(session.controller(0).unwrap().steps_left(), DEFAULT_STEP_OUT_BUDGET);
}

#[test]
fn go_to_address_arms_a_temporary_breakpoint() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["go 8"]);
    machine.run_slice(&mut session, 0, 16);
    assert_eq!(machine.stops, vec![0, 8]);
    assert!(machine.printed("Stopped at temporary breakpoint 8 on CPU 'maincpu'"));
}

#[test]
fn resuming_clears_transient_stop_conditions() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["go 8"]);
    machine.run_slice(&mut session, 0, 12);
    let ctrl = session.controller(0).unwrap();
    assert_eq!(ctrl.stop_conditions().address, None);
    assert_eq!(ctrl.step_mode(), StepMode::None);
}

#[test]
fn breakpoints_stop_and_announce_their_index() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    let index = session.breakpoint_set(&mut machine, 0, 0x6, None, None).unwrap();
    assert_eq!(index, 1);
    machine.run_slice(&mut session, 0, 8);
    assert_eq!(machine.stops, vec![6]);
    assert!(machine.printed("Stopped at breakpoint 1"));
}

#[test]
fn breakpoint_conditions_are_evaluated_in_the_processor_scope() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    session.breakpoint_set(&mut machine, 0, 0x6, Some("r0 == 5"), None).unwrap();
    machine.run_slice(&mut session, 0, 8);
    assert!(machine.stops.is_empty());

    machine.cpus[0].pc = 0;
    machine.cpus[0].regs[0] = 5;
    machine.run_slice(&mut session, 0, 8);
    assert_eq!(machine.stops, vec![6]);
}

#[test]
fn unknown_condition_symbols_are_rejected_at_set_time() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    assert!(session.breakpoint_set(&mut machine, 0, 0x6, Some("bogus == 1"), None).is_err());
    assert!(session.breakpoint_set(&mut machine, 7, 0x6, None, None).is_err());
    assert_eq!(session.controller(0).unwrap().breakpoints().count(), 0);
}

#[test]
fn breakpoint_actions_run_before_the_stop_message() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    session.breakpoint_set(&mut machine, 0, 0x4, None, Some("print reached")).unwrap();
    session.breakpoint_set(&mut machine, 0, 0x8, None, Some("go")).unwrap();
    machine.run_slice(&mut session, 0, 8);
    assert_eq!(machine.stops, vec![4]);
    let reached = machine.output.iter().position(|line| line == "reached").unwrap();
    let stopped = machine.output.iter().position(|line| line == "Stopped at breakpoint 1").unwrap();
    assert!(reached < stopped);
    assert!(!machine.printed("Stopped at breakpoint 2"));
}

#[test]
fn breakpoints_enumerate_newest_first_and_survive_disable() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    for address in [0x10, 0x20, 0x30] {
        session.breakpoint_set(&mut machine, 0, address, None, None).unwrap();
    }
    assert!(session.breakpoint_clear(&mut machine, 2));
    assert!(!session.breakpoint_clear(&mut machine, 2));
    assert!(session.breakpoint_enable(&mut machine, 3, false));
    let ctrl = session.controller(0).unwrap();
    let order: Vec<u32> = ctrl.breakpoints().map(Breakpoint::index).collect();
    assert_eq!(order, vec![3, 1]);

    machine.run_slice(&mut session, 0, 0x20);
    assert_eq!(machine.stops, vec![0x10]);
    assert!(!machine.printed("Stopped at breakpoint 3"));
}

#[test]
fn breakpoint_indices_are_never_reused() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    let first = session.breakpoint_set(&mut machine, 0, 0x10, None, None).unwrap();
    session.breakpoint_clear_all(&mut machine, 0);
    let second = session.breakpoint_set(&mut machine, 0, 0x10, None, None).unwrap();
    assert_eq!((first, second), (1, 2));
}

#[test]
fn time_interval_stops_once_machine_time_is_reached() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["gtime 1"]);
    machine.run_slice(&mut session, 0, 1500);
    assert_eq!(machine.stops, vec![0, 0x7D0]);
    assert!(machine.printed("Stopped at time interval 0.001"));
}

#[test]
fn go_vblank_stops_at_the_next_slice_after_a_vblank() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["gvblank"]);
    machine.run_slice(&mut session, 0, 4);
    assert_eq!(machine.stops, vec![0]);

    session.vblank();
    machine.run_slice(&mut session, 0, 4);
    assert_eq!(machine.stops, vec![0, 8]);
    assert!(machine.printed("Stopped at VBLANK"));
}

#[test]
fn user_break_is_honoured_at_vblank() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    machine.run_slice(&mut session, 0, 4);
    machine.break_request = true;
    machine.run_slice(&mut session, 0, 4);
    assert!(machine.stops.is_empty());
    assert!(machine.break_request);

    session.vblank();
    machine.run_slice(&mut session, 0, 4);
    assert_eq!(machine.stops, vec![0x10]);
    assert!(machine.printed("User-initiated break"));
    assert!(!machine.break_request);
}

#[test]
fn interrupt_and_exception_stops_match_their_line() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    session.go_interrupt(Some(3));
    session.interrupt_hook(&mut machine, 0, 2);
    assert!(!session.is_stopped());
    session.interrupt_hook(&mut machine, 0, 3);
    assert!(session.is_stopped());
    assert!(machine.printed("Stopped on interrupt (CPU 'maincpu', IRQ 3)"));

    session.go_exception(6);
    session.exception_hook(&mut machine, 0, 5);
    assert!(!session.is_stopped());
    session.exception_hook(&mut machine, 0, 6);
    assert!(session.is_stopped());
    assert_eq!(session.state().execution(), ExecutionState::Stopped);
}

#[test]
fn next_device_hands_the_stop_to_the_following_processor() {
    let mut second = ToyCpu::new("audiocpu");
    second.pc = 0x40;
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu"), second]);
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["next"]);
    machine.run_slice(&mut session, 0, 4);
    assert!(session.is_stopped());
    machine.run_slice(&mut session, 1, 4);
    assert_eq!(machine.stops, vec![0, 0x40]);
    assert_eq!(session.visible_cpu(), Some(1));
}

#[test]
fn ignored_processors_skip_the_hook_but_the_last_one_cannot_be_ignored() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu"), ToyCpu::new("audiocpu")]);
    let mut session = DebugSession::new(&mut machine, running());
    assert!(session.ignore_cpu(&mut machine, 1, true));
    assert!(!session.should_call_instruction_hook(1));
    assert!(!session.ignore_cpu(&mut machine, 0, true));
    assert!(machine.printed("Can't ignore all devices"));
    assert!(session.ignore_cpu(&mut machine, 1, false));
    assert!(session.should_call_instruction_hook(1));
}

#[test]
fn ignoring_the_visible_processor_while_stopped_moves_on() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu"), ToyCpu::new("audiocpu")]);
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.queue(&["ignore 0"]);
    machine.run_slice(&mut session, 0, 4);
    assert_eq!(machine.stops, vec![0]);
    assert!(!session.controller(0).unwrap().is_observing());
    assert!(session.is_stopped());
    machine.run_slice(&mut session, 1, 4);
    assert_eq!(machine.stops, vec![0, 0]);
    assert_eq!(session.visible_cpu(), Some(1));
}

#[test]
fn ignoring_a_background_processor_leaves_execution_alone() {
    let mut machine = ToyMachine::new(vec![ToyCpu::new("maincpu"), ToyCpu::new("audiocpu")]);
    let mut session = DebugSession::new(&mut machine, running());
    machine.run_slice(&mut session, 0, 2);
    assert!(session.ignore_cpu(&mut machine, 0, true));
    assert!(!session.is_stopped());
    assert!(!session.controller(0).unwrap().stop_conditions().context_switch);
}

#[test]
fn history_records_executed_program_counters() {
    let mut machine = machine(ToyCpu::new("maincpu").with_program(0x6, &[OP_JMP, 0, 0x00, 0x00]));
    let mut session = DebugSession::new(&mut machine, running());
    machine.run_slice(&mut session, 0, 5);
    let ctrl = session.controller(0).unwrap();
    assert_eq!(ctrl.pc_history(0), Some(0));
    assert_eq!(ctrl.pc_history(1), Some(6));
    assert_eq!(ctrl.pc_history(2), Some(4));
}

#[test]
fn instruction_hook_callback_can_request_a_stop() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, running());
    session.set_instruction_hook(0, Some(Box::new(|pc: u64| pc == 0xA)));
    machine.run_slice(&mut session, 0, 8);
    assert_eq!(machine.stops, vec![0xA]);
}

#[test]
fn pending_scheduler_events_release_the_wait_loop() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    machine.event_pending = true;
    machine.queue(&["print waiting"]);
    session.instruction_hook(&mut machine, 0, 0);
    assert!(!session.is_stopped());
    assert_eq!(machine.executed, vec!["print waiting"]);
    assert!(!session.should_call_instruction_hook(0));
}

#[test]
fn scripts_run_while_stopped() {
    let mut machine = machine(ToyCpu::new("maincpu"));
    let mut session = DebugSession::new(&mut machine, DebugConfig::default());
    session.source_script("# comment\n\nprint one\nstep 2\nprint never\n");
    machine.queue(&["print waiting"]);
    machine.run_slice(&mut session, 0, 8);
    assert_eq!(machine.stops, vec![0, 4]);
    assert_eq!(&machine.executed[..3], &["print waiting", "print one", "step 2"]);
    assert_eq!(session.pending_script_lines(), 1);
    assert!(!machine.printed("never"));
}
