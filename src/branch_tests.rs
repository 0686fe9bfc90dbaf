use crate::assembler::ScriptBuilder;
use crate::config::ScriptConfig;
use crate::error::VmError;
use crate::instruction::{Opcode, Operand};
use crate::test_utils::{image_with, interpreter_for, interpreter_with, MockHost};
use crate::thread::{ScriptCallFrame, ScriptResult};
use crate::zrand::{RandomGenerator, ScriptRand};
use crate::VmResult;
use test_log::test;

fn run(b: &ScriptBuilder, frame: &mut ScriptCallFrame) -> VmResult<ScriptResult> {
    let image = image_with(b, vec![0; 8], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    vm.run_script(&mut MockHost::new(), 1, frame)
}

fn returns(b: &ScriptBuilder) -> i16 {
    let mut frame = ScriptCallFrame::default();
    assert_eq!(run(b, &mut frame).unwrap(), ScriptResult::Finished);
    frame.return_value
}

/// Labels `case0`..`caseN` that each return their number.
fn case_returns(b: &mut ScriptBuilder, count: i16) {
    for n in 0..count {
        b.label(&format!("case{n}")).constant(n).op(Opcode::Return);
    }
}

#[test]
fn test_jmp_skips_code() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .jump(Opcode::Jmp, "over")
        .constant(1)
        .op(Opcode::Return)
        .label("over")
        .constant(2)
        .op(Opcode::Return);
    assert_eq!(returns(&b), 2);
}

#[test]
fn test_conditional_jumps_peek_or_pop() {
    // jmp_true keeps its operand: 7 is still there to return
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(7)
        .jump(Opcode::JmpTrue, "taken")
        .op(Opcode::Zero)
        .op(Opcode::Return)
        .label("taken")
        .op(Opcode::Return);
    assert_eq!(returns(&b), 7);

    // jmp_false_v pops it: the 9 underneath is returned
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(9)
        .op(Opcode::Zero)
        .jump(Opcode::JmpFalseV, "taken")
        .op(Opcode::Zero)
        .op(Opcode::Return)
        .label("taken")
        .op(Opcode::Return);
    assert_eq!(returns(&b), 9);

    // not taken
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .op(Opcode::One)
        .jump(Opcode::JmpFalseV, "taken")
        .constant(3)
        .op(Opcode::Return)
        .label("taken")
        .constant(4)
        .op(Opcode::Return);
    assert_eq!(returns(&b), 3);
}

#[test]
fn test_loops_count_through_data() {
    let counter = Operand::Data(0);
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .label("loop")
        .access(Opcode::IncV, counter.clone())
        .access(Opcode::GetInt, counter.clone())
        .constant(25)
        .op(Opcode::Lt)
        .jump(Opcode::JmpTrueV, "loop")
        .access(Opcode::GetInt, counter)
        .op(Opcode::Return);
    assert_eq!(returns(&b), 25);
}

fn switch_on(value: i16) -> i16 {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(value)
        .switch(
            &[(4, "case1"), (2, "case2"), (4, "case3"), (0xffff, "case4")],
            "case0",
        );
    case_returns(&mut b, 5);
    returns(&b)
}

#[test]
fn test_switch_takes_first_match() {
    assert_eq!(switch_on(2), 2);
    assert_eq!(switch_on(4), 1);
}

#[test]
fn test_switch_default() {
    assert_eq!(switch_on(3), 0);
    // a negative scrutinee never equals an unsigned case value
    assert_eq!(switch_on(-1), 0);
}

#[test]
fn test_random_jump_honours_zero_weights() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .random(&[(0, "case0"), (5, "case1"), (0, "case2")]);
    case_returns(&mut b, 3);
    for _ in 0..10 {
        assert_eq!(returns(&b), 1);
    }
}

#[test]
fn test_random_jump_covers_the_table() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .random(&[(1, "case0"), (1, "case1"), (1, "case2")]);
    case_returns(&mut b, 3);

    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image).unwrap();
    let mut host = MockHost::new();
    let mut seen = [false; 3];
    for _ in 0..100 {
        let mut frame = ScriptCallFrame::default();
        vm.run_script(&mut host, 1, &mut frame).unwrap();
        seen[frame.return_value as usize] = true;
    }
    assert_eq!(seen, [true; 3]);
}

fn seeded(seed: i16, restriction: u16, rand_seed: u64) -> i16 {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(seed)
        .seeded_random(restriction, &[(1, "case0"), (1, "case1"), (1, "case2"), (1, "case3")]);
    case_returns(&mut b, 4);

    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let mut vm = interpreter_for(&image)
        .unwrap()
        .with_rand(ScriptRand::new_predictable(rand_seed));
    let mut frame = ScriptCallFrame::default();
    vm.run_script(&mut MockHost::new(), 1, &mut frame).unwrap();
    frame.return_value
}

#[test]
fn test_seeded_random_depends_only_on_seed() {
    for seed in [0i16, 1, 17, 300, -5] {
        let expected = (RandomGenerator::new(seed as u16).next_value() % 4) as i16;
        assert_eq!(seeded(seed, 1, 1), expected, "seed {seed}");
        assert_eq!(seeded(seed, 1, 99), expected, "seed {seed}");
    }
}

#[test]
fn test_restricted_seeded_random_adds_engine_noise() {
    let restriction = 5u16;
    for seed in [0i16, 3, -5, 4000] {
        for rand_seed in [1u64, 7, 99] {
            let noise = ScriptRand::new_predictable(rand_seed).random_below(restriction) as i32;
            let lcg_seed = (noise + seed as i32 * restriction as i32) as u16;
            let expected = (RandomGenerator::new(lcg_seed).next_value() % 4) as i16;

            let first = seeded(seed, restriction, rand_seed);
            assert_eq!(first, expected, "seed {seed}, rand {rand_seed}");
            assert_eq!(seeded(seed, restriction, rand_seed), first);
        }
    }
}

#[test]
fn test_seeded_random_with_empty_table_is_fatal() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0).constant(3).seeded_random(1, &[]);
    assert!(matches!(
        run(&b, &mut ScriptCallFrame::default()),
        Err(VmError::RandomTableExhausted { .. })
    ));
}

#[test]
fn test_division_by_zero_is_fatal() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .constant(1)
        .op(Opcode::Zero)
        .op(Opcode::Div)
        .op(Opcode::Return);
    assert!(matches!(
        run(&b, &mut ScriptCallFrame::default()),
        Err(VmError::DivideByZero { .. })
    ));
}

#[test]
fn test_runaway_loop_is_reported_as_hung() {
    let mut b = ScriptBuilder::new();
    b.function("Main", 0)
        .label("spin")
        .jump(Opcode::Jmp, "spin");
    let image = image_with(&b, vec![], &["Main"]).unwrap();
    let config = ScriptConfig {
        run_limit: 8,
        ..Default::default()
    };
    let mut vm = interpreter_with(&image, config).unwrap();
    let result = vm.run_script(&mut MockHost::new(), 1, &mut ScriptCallFrame::default());
    assert!(matches!(result, Err(VmError::ThreadHung(_))));
    assert!(vm.threads().is_empty());
}
