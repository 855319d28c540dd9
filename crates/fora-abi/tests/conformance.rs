//! Compiled entries replay scripts exactly like host operations.

use fora_abi::conformance::{ConformanceHarness, Returned, Step};
use fora_abi::{AbiError, CompilerConfig, NativeCodeCompiler, OptLevel};
use proptest::prelude::*;

fn harness() -> ConformanceHarness {
    ConformanceHarness::new(NativeCodeCompiler::global()).unwrap()
}

#[test]
fn test_growth() {
    let report = harness().run(&[Step::Resize(3), Step::Resize(9), Step::Count]);
    report.assert_equivalent();
    assert_eq!(report.compiled[2].outcome, Ok(Returned::Count(9)));
    assert_eq!(report.compiled[1].slots, vec![None; 9]);
}

#[test]
fn test_shrink_to_zero() {
    let report = harness().run(&[
        Step::Resize(4),
        Step::Assign(0, Some(10)),
        Step::Assign(2, Some(12)),
        Step::Assign(3, Some(13)),
        Step::Resize(0),
        Step::Count,
    ]);
    report.assert_equivalent();
    assert_eq!(report.compiled[4].released, vec![10, 12, 13]);
    assert_eq!(report.compiled[5].outcome, Ok(Returned::Count(0)));
    assert!(report.compiled_teardown.is_empty());
}

#[test]
fn test_no_op_resize() {
    let report = harness().run(&[
        Step::Resize(2),
        Step::Assign(1, Some(5)),
        Step::Resize(2),
    ]);
    report.assert_equivalent();
    assert!(report.compiled[2].released.is_empty());
    assert_eq!(report.compiled[2].slots, vec![None, Some(5)]);
    assert_eq!(report.compiled_teardown, vec![5]);
}

#[test]
fn test_in_bounds_lookup() {
    let report = harness().run(&[
        Step::Resize(3),
        Step::Assign(2, Some(8)),
        Step::Lookup(2),
        Step::Lookup(0),
    ]);
    report.assert_equivalent();
    assert_eq!(report.compiled[2].outcome, Ok(Returned::Slot(Some(8))));
    assert_eq!(report.compiled[3].outcome, Ok(Returned::Slot(None)));
}

#[test]
fn test_out_of_bounds_lookup() {
    let report = harness().run(&[Step::Resize(3), Step::Lookup(3), Step::Lookup(-1)]);
    report.assert_equivalent();
    assert_eq!(
        report.compiled[1].outcome,
        Err(AbiError::IndexOutOfRange { index: 3, count: 3 })
    );
    assert_eq!(
        report.compiled[2].outcome,
        Err(AbiError::InvalidArgument("index -1 is negative".into()))
    );
}

#[test]
fn test_overwrite_releases_previous_once() {
    let report = harness().run(&[
        Step::Resize(1),
        Step::Assign(0, Some(1)),
        Step::Assign(0, Some(2)),
        Step::Assign(0, None),
    ]);
    report.assert_equivalent();
    assert_eq!(report.compiled[2].released, vec![1]);
    assert_eq!(report.compiled[3].released, vec![2]);
    assert!(report.compiled_teardown.is_empty());
}

#[test]
fn test_failed_assign_releases_nothing() {
    let report = harness().run(&[Step::Resize(1), Step::Assign(5, Some(3))]);
    report.assert_equivalent();
    assert_eq!(
        report.compiled[1].outcome,
        Err(AbiError::IndexOutOfRange { index: 5, count: 1 })
    );
    assert!(report.compiled[1].released.is_empty());
}

#[test]
fn test_invalid_sizes() {
    let report = harness().run(&[
        Step::Resize(2),
        Step::Resize(-4),
        Step::Resize(i64::MAX),
        Step::Count,
    ]);
    report.assert_equivalent();
    assert!(report.compiled[1].outcome.is_err());
    assert!(report.compiled[2].outcome.is_err());
    assert_eq!(report.compiled[3].outcome, Ok(Returned::Count(2)));
}

#[test]
fn test_divergence_is_reported() {
    let mut report = harness().run(&[Step::Resize(2), Step::Count]);
    report.compiled[1].count = 3;
    let divergence = report.first_divergence().expect("tampered report diverges");
    assert_eq!(divergence.step, Some(1));
    assert!(divergence.to_string().contains("step 1"));
}

#[test]
fn test_unoptimized_compiler_conforms() {
    let compiler = NativeCodeCompiler::new(CompilerConfig::new().with_opt_level(OptLevel::None));
    let harness = ConformanceHarness::new(&compiler).unwrap();
    harness
        .run(&[
            Step::Resize(5),
            Step::Assign(4, Some(1)),
            Step::Resize(8),
            Step::Lookup(4),
            Step::Resize(1),
        ])
        .assert_equivalent();
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Count),
        (-2i64..40).prop_map(Step::Resize),
        (-2i64..40).prop_map(Step::Lookup),
        (-2i64..40, proptest::option::of(0u64..1000))
            .prop_map(|(index, label)| Step::Assign(index, label)),
    ]
}

proptest! {
    #[test]
    fn compiled_scripts_match_direct(steps in prop::collection::vec(arb_step(), 0..40)) {
        let report = harness().run(&steps);
        let divergence = report.first_divergence();
        prop_assert!(divergence.is_none(), "{}", divergence.map(|d| d.to_string()).unwrap_or_default());
    }
}
