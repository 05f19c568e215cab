use lathist::backend::{SimKernel, SimStore};
use lathist::domain::{CpuId, Identity, TraceError, TraceState};
use lathist::lifecycle::{Artifact, TraceManager, TraceSpec};

fn setup(cores: usize, symbols: &[&str]) -> (SimKernel, TraceManager<SimKernel, SimStore>) {
    let kernel = SimKernel::new(cores, symbols.iter().copied());
    let manager = TraceManager::new(kernel.clone(), SimStore::new());
    (kernel, manager)
}

fn names(manager: &TraceManager<SimKernel, SimStore>) -> Vec<String> {
    manager.list().unwrap().map(|n| n.unwrap().to_string()).collect()
}

#[test]
fn test_sleep_scenario() {
    let (kernel, mut manager) = setup(4, &["sleep"]);
    let info = manager.create(&TraceSpec::new("sleep")).unwrap();
    assert_eq!(info.state, TraceState::Active);
    assert_eq!(info.n_slots, 66);
    assert_eq!(kernel.hook_count(), 2);

    let id = Identity::new(100, 100);
    for _ in 0..100 {
        kernel.call("sleep", id, CpuId(0), 1_000_000);
    }

    let report = manager.read("sleep").unwrap();
    assert_eq!(report.rows.len(), 1);
    let row = &report.rows[0];
    assert_eq!(row.slot, 20);
    assert_eq!(row.samples, 100);
    assert_eq!(row.avg_ns, 1_000_000);
    assert_eq!(row.cpus.len(), 1);
    assert_eq!(row.cpus[0].cpu, 0);
}

#[test]
fn test_failed_create_leaves_name_free() {
    let (kernel, mut manager) = setup(1, &["msleep"]);
    manager.create(&TraceSpec::new("m")).unwrap_err();
    manager.create(&TraceSpec::new("m").start("msleep")).unwrap();
    assert_eq!(kernel.hook_count(), 2);

    kernel.call("msleep", Identity::new(1, 1), CpuId(0), 10);
    assert_eq!(manager.read("m").unwrap().total_samples(), 1);
}

#[test]
fn test_remove_then_read_is_not_found() {
    let (kernel, mut manager) = setup(1, &["sleep"]);
    manager.create(&TraceSpec::new("sleep")).unwrap();

    let outcome = manager.remove("sleep").unwrap();
    assert!(outcome.is_clean());
    assert_eq!(kernel.hook_count(), 0);
    assert_eq!(manager.state("sleep").unwrap(), TraceState::Absent);

    assert!(matches!(manager.read("sleep"), Err(TraceError::NotFound(_))));
    assert!(matches!(manager.remove("sleep"), Err(TraceError::NotFound(_))));
}

#[test]
fn test_invalid_precision_touches_nothing() {
    let (kernel, mut manager) = setup(1, &["x"]);
    let err = manager.create(&TraceSpec::new("x").bits(4)).unwrap_err();
    assert!(matches!(err, TraceError::InvalidPrecision(4)));
    assert!(err.is_config_error());
    assert!(manager.store().is_empty());
    assert_eq!(kernel.hook_count(), 0);
}

#[test]
fn test_invalid_name_touches_nothing() {
    let (kernel, mut manager) = setup(1, &["x"]);
    for bad in ["", "..", "a/b"] {
        let err = manager.create(&TraceSpec::new(bad).start("x")).unwrap_err();
        assert!(err.is_config_error(), "{bad:?} accepted");
    }
    assert!(manager.store().is_empty());
    assert_eq!(kernel.hook_count(), 0);
}

#[test]
fn test_duplicate_trace() {
    let (kernel, mut manager) = setup(1, &["f"]);
    manager.create(&TraceSpec::new("f")).unwrap();
    let err = manager.create(&TraceSpec::new("f").bits(2)).unwrap_err();
    assert!(matches!(err, TraceError::DuplicateTrace(_)));
    // The existing trace is untouched
    assert_eq!(kernel.hook_count(), 2);
    assert_eq!(manager.read("f").unwrap().frac_bits.get(), 0);
}

#[test]
fn test_both_hook_failures_reported() {
    let (kernel, mut manager) = setup(1, &["real"]);
    let err = manager.create(&TraceSpec::new("t").start("nope_a").end("nope_b")).unwrap_err();
    let TraceError::HookRegistration(failures) = err else {
        panic!("unexpected error: {err}");
    };
    assert!(failures.start.as_deref().is_some_and(|s| s.contains("nope_a")));
    assert!(failures.end.as_deref().is_some_and(|s| s.contains("nope_b")));
    assert!(manager.store().is_empty());
    assert_eq!(kernel.hook_count(), 0);
}

#[test]
fn test_one_hook_failure_releases_the_other() {
    let (kernel, mut manager) = setup(1, &["real"]);
    let err = manager.create(&TraceSpec::new("t").start("real").end("missing")).unwrap_err();
    let TraceError::HookRegistration(failures) = err else {
        panic!("unexpected error: {err}");
    };
    assert!(failures.start.is_none());
    assert!(failures.end.is_some());
    assert_eq!(kernel.hook_count(), 0);
    assert_eq!(manager.state("t").unwrap(), TraceState::Absent);
}

#[test]
fn test_attach_failure_rolls_back() {
    let (kernel, mut manager) = setup(1, &["f"]);
    manager.store_mut().fail_attach(Some(Artifact::StartHook));

    let err = manager.create(&TraceSpec::new("f")).unwrap_err();
    assert!(matches!(err, TraceError::Persist { artifact: Artifact::StartHook, .. }));
    assert!(manager.store().is_empty());
    assert_eq!(kernel.hook_count(), 0);

    // Nothing left behind blocks a retry
    manager.store_mut().fail_attach(None);
    manager.create(&TraceSpec::new("f")).unwrap();
}

#[test]
fn test_partial_teardown_is_reported_not_fatal() {
    let (kernel, mut manager) = setup(1, &["f"]);
    manager.create(&TraceSpec::new("f")).unwrap();
    manager.store_mut().fail_detach(Artifact::StartHook);

    // The start hook stays persisted, so the container cannot go either
    let err = manager.remove("f").unwrap_err();
    assert!(matches!(err, TraceError::TeardownFailed { .. }));
    assert_eq!(manager.store().artifacts("f"), vec![Artifact::StartHook]);
    assert_eq!(kernel.hook_count(), 1);
}

#[test]
fn test_partial_teardown_with_clean_container() {
    let (_kernel, mut manager) = setup(1, &["f"]);
    manager.create(&TraceSpec::new("f")).unwrap();
    manager.store_mut().fail_remove_container(true);

    let err = manager.remove("f").unwrap_err();
    assert!(matches!(err, TraceError::TeardownFailed { .. }));
    // Every artifact was still released
    assert!(manager.store().artifacts("f").is_empty());
}

#[test]
fn test_logarithmic_spread() {
    let (kernel, mut manager) = setup(2, &["f"]);
    manager.create(&TraceSpec::new("f")).unwrap();
    kernel.call("f", Identity::new(1, 1), CpuId(0), 1);
    kernel.call("f", Identity::new(1, 1), CpuId(1), 1_000_000_000);

    assert_eq!(names(&manager), vec!["f"]);
    let report = manager.read("f").unwrap();
    let slots: Vec<u32> = report.rows.iter().map(|r| r.slot).collect();
    assert_eq!(slots, vec![1, 30]);
    // Above 2^20 the sum keeps only the top bits
    let avg = report.row(30).unwrap().avg_ns;
    assert!(avg <= 1_000_000_000 && 1_000_000_000 - avg < 1 << 10, "avg {avg}");
}

#[test]
fn test_list_all_traces() {
    let (_kernel, mut manager) = setup(1, &["a", "b", "c"]);
    for name in ["c", "a", "b"] {
        manager.create(&TraceSpec::new(name)).unwrap();
    }
    let mut listed = names(&manager);
    listed.sort();
    assert_eq!(listed, vec!["a", "b", "c"]);

    manager.remove("b").unwrap();
    let mut listed = names(&manager);
    listed.sort();
    assert_eq!(listed, vec!["a", "c"]);
}

#[test]
fn test_start_and_end_on_different_symbols() {
    let (kernel, mut manager) = setup(1, &["vfs_read", "vfs_write"]);
    manager
        .create(&TraceSpec::new("rw").start("vfs_read").end("vfs_write").bits(1))
        .unwrap();

    let id = Identity::new(5, 6);
    kernel.enter("vfs_read", id);
    kernel.clock().advance(12);
    // Returning from the start symbol records nothing
    kernel.exit("vfs_read", id, CpuId(0));
    kernel.exit("vfs_write", id, CpuId(0));

    let report = manager.read("rw").unwrap();
    assert_eq!(report.total_samples(), 1);
    assert_eq!(report.rows[0].avg_ns, 12);
}

#[test]
fn test_exit_without_entry_is_discarded() {
    let (kernel, mut manager) = setup(1, &["f"]);
    manager.create(&TraceSpec::new("f")).unwrap();

    // Forked child: returns from a call its parent entered
    kernel.enter("f", Identity::new(1, 1));
    kernel.exit("f", Identity::new(1, 2), CpuId(0));
    assert_eq!(manager.read("f").unwrap().total_samples(), 0);

    // Each start is consumed by exactly one end
    kernel.exit("f", Identity::new(1, 1), CpuId(0));
    kernel.exit("f", Identity::new(1, 1), CpuId(0));
    assert_eq!(manager.read("f").unwrap().total_samples(), 1);
}

#[test]
fn test_merged_average_across_cores_is_unweighted() {
    let (kernel, mut manager) = setup(2, &["f"]);
    manager.create(&TraceSpec::new("f")).unwrap();

    // Same slot (8 covers 128..=255) on two cores with uneven counts
    kernel.call("f", Identity::new(1, 1), CpuId(0), 130);
    for _ in 0..9 {
        kernel.call("f", Identity::new(2, 2), CpuId(1), 250);
    }

    let row = manager.read("f").unwrap().rows.remove(0);
    assert_eq!(row.slot, 8);
    assert_eq!(row.samples, 10);
    assert_eq!(row.avg_ns, (130 + 250) / 2);
}

#[test]
fn test_two_traces_on_one_symbol_are_independent() {
    let (kernel, mut manager) = setup(1, &["f"]);
    manager.create(&TraceSpec::new("coarse").start("f")).unwrap();
    manager.create(&TraceSpec::new("fine").start("f").bits(3)).unwrap();
    assert_eq!(kernel.hook_count(), 4);

    kernel.call("f", Identity::new(1, 1), CpuId(0), 12);

    assert_eq!(manager.read("coarse").unwrap().rows[0].slot, 4);
    // 12 = 0b1100 with 3 fractional bits: bucket 1, exact
    assert_eq!(manager.read("fine").unwrap().rows[0].slot, 12);

    manager.remove("coarse").unwrap();
    assert_eq!(kernel.hook_count(), 2);
}
