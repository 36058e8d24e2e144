use fixtures::*;

use std::cell::RefCell;
use std::rc::Rc;

use etw_decode::providers::{
    FILE_IO_TASK, REGISTRY_TASK, THREAD_TASK, file_io_opcode, registry_opcode, thread_opcode,
};
use etw_decode::{
    ContextSwitch, DispatchOutcome, DispatchTable, TraceState, register_kernel_decoders,
};
use pretty_assertions::assert_eq;

fn setup() -> (DispatchTable, TraceState, Rc<RefCell<Vec<ContextSwitch>>>) {
    let mut table = DispatchTable::new();
    let state = TraceState::new();
    let switches: Rc<RefCell<Vec<ContextSwitch>>> = Rc::default();

    let sink = Rc::clone(&switches);
    register_kernel_decoders(
        &mut table,
        &state,
        Box::new(move |s| sink.borrow_mut().push(s)),
    );

    (table, state, switches)
}

#[test]
fn test_thread_starts_resolve_context_switches() {
    ensure_env_logger_initialized();
    let (mut table, state, switches) = setup();

    // Thread 8 starts under process 100 at t=1000, thread 9 under process
    // 200 at t=2000. Thread 8 is later reused by process 300 at t=5000.
    let starts = [
        (100_u32, 8_u32, 1000_i64),
        (200, 9, 2000),
        (300, 8, 5000),
    ];
    for (pid, tid, t) in starts {
        let payload = thread_start_payload(pid, tid);
        let outcome = table.dispatch(&classic_record(
            THREAD_TASK,
            thread_opcode::START,
            t,
            &payload,
        ));
        assert!(matches!(outcome, DispatchOutcome::Handled { .. }));
    }

    // A switch at t=3000 sees the original owners; one at t=6000 sees the
    // reused thread's new process.
    let payload = cswitch_payload(8, 9);
    table.dispatch(&classic_record(
        THREAD_TASK,
        thread_opcode::CSWITCH,
        3000,
        &payload,
    ));
    let payload = cswitch_payload(9, 8);
    table.dispatch(&classic_record(
        THREAD_TASK,
        thread_opcode::CSWITCH,
        6000,
        &payload,
    ));

    let switches = switches.borrow();
    assert_eq!(switches.len(), 2);
    assert_eq!(switches[0].new_thread, 8);
    assert_eq!(switches[0].new_process, Some(100));
    assert_eq!(switches[0].old_process, Some(200));
    assert_eq!(switches[1].old_thread, 8);
    assert_eq!(switches[1].old_process, Some(300));
    assert_eq!(switches[1].new_process, Some(200));

    // Direct state queries agree with what the decoders saw.
    assert_eq!(state.resolve_process(8, 3000), Some(100));
    assert_eq!(state.resolve_process(8, 6000), Some(300));
    assert_eq!(state.resolve_process(8, 500), None);
}

#[test]
fn test_unknown_threads_resolve_to_none_not_error() {
    ensure_env_logger_initialized();
    let (mut table, _state, switches) = setup();

    let payload = cswitch_payload(123, 456);
    let outcome = table.dispatch(&classic_record(
        THREAD_TASK,
        thread_opcode::CSWITCH,
        1000,
        &payload,
    ));

    assert!(matches!(outcome, DispatchOutcome::Handled { .. }));
    let switches = switches.borrow();
    assert_eq!(switches[0].new_process, None);
    assert_eq!(switches[0].old_process, None);
}

#[test]
fn test_dc_start_announces_threads_too() {
    ensure_env_logger_initialized();
    let (mut table, state, _switches) = setup();

    // Rundown of pre-existing threads arrives as DCStart.
    let payload = thread_start_payload(42, 7);
    table.dispatch(&classic_record(
        THREAD_TASK,
        thread_opcode::DC_START,
        100,
        &payload,
    ));

    assert_eq!(state.resolve_process(7, 100), Some(42));
}

#[test]
fn test_file_object_names_are_time_indexed() {
    ensure_env_logger_initialized();
    let (mut table, state, _switches) = setup();

    // The kernel reuses file object addresses; the history keeps both facts.
    let payload = file_name_payload(0xFFFF_8000_1234_0000, "C:\\Windows\\notepad.exe");
    table.dispatch(&classic_record(
        FILE_IO_TASK,
        file_io_opcode::FILE_CREATE,
        1000,
        &payload,
    ));
    let payload = file_name_payload(0xFFFF_8000_1234_0000, "C:\\pagefile.sys");
    table.dispatch(&classic_record(
        FILE_IO_TASK,
        file_io_opcode::NAME,
        5000,
        &payload,
    ));

    assert_eq!(
        state.resolve_name(0xFFFF_8000_1234_0000, 2000),
        Some("C:\\Windows\\notepad.exe".to_string())
    );
    assert_eq!(
        state.resolve_name(0xFFFF_8000_1234_0000, 5000),
        Some("C:\\pagefile.sys".to_string())
    );
    assert_eq!(state.resolve_name(0xFFFF_8000_1234_0000, 999), None);
    assert_eq!(state.resolve_name(0xDEAD_BEEF, 2000), None);
}

#[test]
fn test_registry_kcb_names_share_the_object_table() {
    ensure_env_logger_initialized();
    let (mut table, state, _switches) = setup();

    let payload = registry_payload(0xFFFF_9000_0000_0010, "\\REGISTRY\\MACHINE\\SOFTWARE");
    table.dispatch(&classic_record(
        REGISTRY_TASK,
        registry_opcode::KCB_CREATE,
        1000,
        &payload,
    ));

    assert_eq!(
        state.resolve_name(0xFFFF_9000_0000_0010, 1500),
        Some("\\REGISTRY\\MACHINE\\SOFTWARE".to_string())
    );
}

#[test]
fn test_short_payloads_are_skipped_not_fatal() {
    ensure_env_logger_initialized();
    let (mut table, state, switches) = setup();

    let outcome = table.dispatch(&classic_record(
        THREAD_TASK,
        thread_opcode::START,
        1000,
        &[0x01, 0x02],
    ));

    // The template matched; the decoder just had nothing usable to record.
    assert!(matches!(outcome, DispatchOutcome::Handled { .. }));
    assert!(state.threads.borrow().is_empty());
    assert!(switches.borrow().is_empty());
}

#[test]
fn test_modern_records_never_hit_classic_kernel_decoders() {
    ensure_env_logger_initialized();
    let (mut table, state, _switches) = setup();

    // Same GUID and numeric ID as a thread start, but modern addressing.
    let payload = thread_start_payload(100, 8);
    let mut record = classic_record(THREAD_TASK, 0, 1000, &payload);
    record.flags = etw_decode::HeaderFlags::HEADER_64_BIT;
    record.event_id = u16::from(thread_opcode::START);
    record.opcode = 0;

    let outcome = table.dispatch(&record);

    assert!(matches!(outcome, DispatchOutcome::Unhandled { .. }));
    assert!(state.threads.borrow().is_empty());
}
