use crate::assembler::ScriptBuilder;
use crate::error::VmError;
use crate::host::{BuiltinType, CallTable};
use crate::instruction::{Opcode, Operand};
use crate::test_utils::{image_with, interpreter_for, MockHost, RecordedCall, CODE_SEGMENT};
use crate::thread::{ScriptCallFrame, ScriptResult, ThreadState};
use std::cell::RefCell;
use std::rc::Rc;
use test_log::test;

/// Native recording the caller's stack pointer.
fn stack_probe(host: &mut MockHost) -> (u16, Rc<RefCell<Vec<usize>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let func = host.native(CallTable::Global, move |call| {
        log.borrow_mut().push(call.thread.stack_ptr());
        Ok(0)
    });
    (func, seen)
}

#[test]
fn test_call_and_return_restore_the_stack() {
    let mut host = MockHost::new();
    let (probe, seen) = stack_probe(&mut host);

    let mut b = ScriptBuilder::new();
    b.function("Main", 2)
        .ccall(Opcode::CCallV, 0, probe)
        .constant(3)
        .constant(4)
        .call_near(2, "Add2")
        .op(Opcode::Drop)
        .ccall(Opcode::CCallV, 0, probe)
        .constant(3)
        .constant(4)
        .call_near(2, "Add2")
        .op(Opcode::Return);
    b.function("Add2", 1)
        .access(Opcode::GetInt, Operand::Stack(8))
        .access(Opcode::GetInt, Operand::Stack(10))
        .op(Opcode::Sub)
        .op(Opcode::Return);

    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame::default();
    let result = vm.run_script(&mut host, 1, &mut frame).unwrap();

    assert_eq!(result, ScriptResult::Finished);
    // stack[8] is the last argument pushed
    assert_eq!(frame.return_value, 1);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[test]
fn test_call_far_switches_segment() {
    let mut other = ScriptBuilder::new();
    other.function("Far", 0).constant(77).op(Opcode::Return);
    let far_entry = other.address_of("Far").unwrap();

    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .call_far(0, 2, far_entry)
        .constant(1)
        .op(Opcode::Add)
        .op(Opcode::Return);

    let mut image = image_with(&b, vec![], &["Main"]).unwrap();
    image.segment(2, other.build().unwrap());
    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame::default();
    let result = vm.run_script(&mut MockHost::new(), 1, &mut frame).unwrap();
    assert_eq!(result, ScriptResult::Finished);
    assert_eq!(frame.return_value, 78);
}

#[test]
fn test_ccall_passes_arguments_top_first() {
    let mut host = MockHost::new();
    let add = host.native(CallTable::Global, |call| Ok(call.arg(0)? * 10 + call.arg(1)?));

    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(2)
        .constant(5)
        .ccall(Opcode::CCall, 2, add)
        .op(Opcode::Return);

    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame::default();
    vm.run_script(&mut host, 1, &mut frame).unwrap();

    assert_eq!(frame.return_value, 52);
    assert_eq!(
        host.calls,
        vec![RecordedCall {
            table: CallTable::Global,
            func: add,
            args: vec![5, 2],
            invoked_object: 0,
        }]
    );
}

#[test]
fn test_unknown_native_is_fatal() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .ccall(Opcode::CCallV, 0, 3)
        .op(Opcode::ReturnV);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let result = vm.run_script(&mut MockHost::new(), 1, &mut ScriptCallFrame::default());
    assert_eq!(
        result,
        Err(VmError::InvalidFunction {
            table: "global",
            func: 3
        })
    );
}

#[test]
fn test_sleeping_native_resumes_with_result() {
    let mut host = MockHost::new();
    let block = host.native(CallTable::Global, |call| {
        call.sleep();
        Ok(-1)
    });

    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .ccall(Opcode::CCall, 0, block)
        .op(Opcode::Return);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();

    let result = vm
        .run_script(&mut host, 1, &mut ScriptCallFrame::default())
        .unwrap();
    assert_eq!(result, ScriptResult::Async);
    let id = vm.threads().first().unwrap();
    assert_eq!(vm.thread(id).unwrap().state(), ThreadState::Waiting);

    // nothing happens while it sleeps
    vm.dispatch(&mut host).unwrap();
    assert_eq!(vm.thread(id).unwrap().state(), ThreadState::Waiting);

    vm.wake_up_thread_with_result(id, 99).unwrap();
    vm.dispatch(&mut host).unwrap();
    let thread = vm.thread(id).unwrap();
    assert_eq!(thread.state(), ThreadState::Finished);
    assert_eq!(thread.return_value, 99);
}

#[test]
fn test_wake_without_expected_result_leaves_stack() {
    let mut host = MockHost::new();
    let block = host.native(CallTable::Global, |call| {
        call.sleep();
        Ok(0)
    });

    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(12)
        .ccall(Opcode::CCallV, 0, block)
        .op(Opcode::Return);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    vm.run_script(&mut host, 1, &mut ScriptCallFrame::default())
        .unwrap();

    let id = vm.threads().first().unwrap();
    vm.wake_up_thread_with_result(id, 99).unwrap();
    vm.dispatch(&mut host).unwrap();
    assert_eq!(vm.thread(id).unwrap().return_value, 12);
}

/// Segment 1 holding a three-slot vtable: a script method, native
/// `native` and a null slot. The method returns the word at `this[4]`
/// plus the object index stored in its frame.
fn class_segment(native: u16) -> ScriptBuilder {
    let mut b = ScriptBuilder::new();
    b.label("vtable")
        .word(CODE_SEGMENT)
        .target("Method")
        .word(0xffff)
        .word(native)
        .word(0xffff)
        .word(0xffff);
    b.function("Method", 0)
        .access(Opcode::GetInt, Operand::This(4))
        .access(Opcode::GetInt, Operand::Stack(10))
        .op(Opcode::Add)
        .op(Opcode::Return);
    b
}

#[test]
fn test_call_member_on_script_object() {
    let mut b = class_segment(0);
    b.function("Main", 0)
        .constant(1)
        .call_member(Opcode::CallMember, 1, 0, Operand::Data(8))
        .op(Opcode::Return);
    let vtable = b.address_of("vtable").unwrap();

    // object at data offset 8: vtable segment, vtable offset, a field
    let mut data = vec![0u8; 16];
    data[8..10].copy_from_slice(&CODE_SEGMENT.to_le_bytes());
    data[10..12].copy_from_slice(&vtable.to_le_bytes());
    data[12..14].copy_from_slice(&40i16.to_le_bytes());

    let image = image_with(&b, data, &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame::default();
    let result = vm.run_script(&mut MockHost::new(), 1, &mut frame).unwrap();
    assert_eq!(result, ScriptResult::Finished);
    // field 40 plus index 8; the argument is dropped with the 'this' pair
    assert_eq!(frame.return_value, 48);
    assert!(vm.threads().is_empty());
}

#[test]
fn test_call_member_native_on_actor() {
    let mut host = MockHost::new();
    host.native(CallTable::Actor, |_| Ok(0));
    let who = host.native(CallTable::Actor, |call| Ok(call.invoked_object() as i16 + 100));

    let actor = BuiltinType::Object.segment();
    let mut b = class_segment(who);
    b.function("Main", 0)
        .call_member(
            Opcode::CallMember,
            0,
            1,
            Operand::Far {
                segment: actor,
                offset: 3,
            },
        )
        .access(Opcode::GetInt, Operand::Thread(0))
        .op(Opcode::Add)
        .op(Opcode::Return);

    let mut image = image_with(&b, vec![], &["Main"]).unwrap();
    let class = image.export(CODE_SEGMENT, b.address_of("vtable").unwrap());
    host.builtin(BuiltinType::Object, 3, vec![0; 4], class);

    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame {
        invoked_object: 7,
        ..Default::default()
    };
    vm.run_script(&mut host, 1, &mut frame).unwrap();

    // the invoked object is swapped in for the call only
    assert_eq!(frame.return_value, 103 + 7);
    assert_eq!(host.calls[0].table, CallTable::Actor);
    assert_eq!(host.calls[0].invoked_object, 3);
}

#[test]
fn test_null_member_slot() {
    let mut b = class_segment(0);
    b.function("Main", 0)
        .constant(5)
        .call_member(Opcode::CallMemberV, 0, 2, Operand::Data(8))
        .call_member(Opcode::CallMember, 0, 2, Operand::Data(8))
        .op(Opcode::Add)
        .op(Opcode::Return);
    let vtable = b.address_of("vtable").unwrap();
    let mut data = vec![0u8; 16];
    data[8..10].copy_from_slice(&CODE_SEGMENT.to_le_bytes());
    data[10..12].copy_from_slice(&vtable.to_le_bytes());

    let image = image_with(&b, data, &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame::default();
    vm.run_script(&mut MockHost::new(), 1, &mut frame).unwrap();
    assert_eq!(frame.return_value, 5);
}

#[test]
fn test_member_call_on_classless_builtin_is_fatal() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .call_member(
            Opcode::CallMemberV,
            0,
            0,
            Operand::Far {
                segment: BuiltinType::Mission.segment(),
                offset: 2,
            },
        )
        .op(Opcode::ReturnV);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let result = vm.run_script(&mut MockHost::new(), 1, &mut ScriptCallFrame::default());
    assert_eq!(
        result,
        Err(VmError::NoScriptClass {
            kind: "Mission",
            index: 2
        })
    );
}

#[test]
fn test_member_call_looks_up_high_class_numbers() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .call_member(
            Opcode::CallMemberV,
            0,
            0,
            Operand::Far {
                segment: BuiltinType::Mission.segment(),
                offset: 2,
            },
        )
        .op(Opcode::ReturnV);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut host = MockHost::new();
    // only zero means classless; 0x8001 goes to the export table
    host.classes.insert((BuiltinType::Mission, 2), 0x8001);
    let result = vm.run_script(&mut host, 1, &mut ScriptCallFrame::default());
    assert!(
        matches!(result, Err(VmError::ExportOutOfRange { entry: 0x8001, .. })),
        "{result:?}"
    );
}

#[test]
fn test_object_methods_see_their_builtin() {
    let mut host = MockHost::new();
    let b = class_segment(0);
    let mut image = image_with(&b, vec![], &[]).unwrap();
    let class = image.export(CODE_SEGMENT, b.address_of("vtable").unwrap());
    host.builtin(BuiltinType::Object, 3, vec![0, 0, 0, 0, 30, 0], class);

    let mut vm = interpreter_for(&image).unwrap();
    let mut frame = ScriptCallFrame::default();
    let result = vm.run_object_method(&mut host, 3, 0, &mut frame).unwrap();
    assert_eq!(result, ScriptResult::Finished);
    assert_eq!(frame.return_value, 33);
    assert!(vm.threads().is_empty());
}

#[test]
fn test_native_method_result_becomes_script_result() {
    let mut host = MockHost::new();
    let pending = host.native(CallTable::Global, |_| Ok(3));
    let b = class_segment(pending);
    let mut image = image_with(&b, vec![], &[]).unwrap();
    let class = image.export(CODE_SEGMENT, b.address_of("vtable").unwrap());

    let mut vm = interpreter_for(&image).unwrap();
    let result = vm
        .run_method(
            &mut host,
            class,
            BuiltinType::Tag,
            4,
            1,
            &mut ScriptCallFrame::default(),
        )
        .unwrap();
    assert_eq!(result, ScriptResult::Async);
    assert!(vm.threads().is_empty());

    let result = vm
        .run_method(
            &mut host,
            class,
            BuiltinType::Tag,
            4,
            2,
            &mut ScriptCallFrame::default(),
        )
        .unwrap();
    assert_eq!(result, ScriptResult::NoScript);
}

#[test]
fn test_classless_objects_and_tags() {
    let b = class_segment(0);
    let image = image_with(&b, vec![], &[]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut host = MockHost::new();
    let mut frame = ScriptCallFrame::default();

    assert_eq!(
        vm.run_tag_method(&mut host, 9, 0, &mut frame).unwrap(),
        ScriptResult::NoScript
    );
    assert!(matches!(
        vm.run_object_method(&mut host, 9, 0, &mut frame),
        Err(VmError::NoScriptClass { .. })
    ));
}

#[test]
fn test_unimplemented_opcode_aborts_only_the_thread() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .op(Opcode::Speak)
        .constant(1)
        .op(Opcode::Return);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut host = MockHost::new();

    let result = vm
        .run_script(&mut host, 1, &mut ScriptCallFrame::default())
        .unwrap();
    assert_eq!(result, ScriptResult::Aborted);
    assert_eq!(host.messages, vec!["Feature not implemented.".to_string()]);
    assert!(vm.threads().is_empty());
}

#[test]
fn test_extended_level_follows_thread_lifetime() {
    let mut host = MockHost::new();
    let extend = host.native(CallTable::Global, |call| {
        call.set_extended();
        call.sleep();
        Ok(0)
    });
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .ccall(Opcode::CCallV, 0, extend)
        .op(Opcode::ReturnV);
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();

    vm.run_script(&mut host, 1, &mut ScriptCallFrame::default())
        .unwrap();
    assert_eq!(vm.extended_level(), 1);

    let id = vm.threads().first().unwrap();
    vm.abort_thread(id).unwrap();
    assert_eq!(vm.extended_level(), 1);
    vm.dispatch(&mut host).unwrap();
    assert_eq!(vm.extended_level(), 0);
    assert!(vm.threads().is_empty());
}
