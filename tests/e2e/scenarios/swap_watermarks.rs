use crate::harness::{Assertion, Scenario};
use bridge_core::ProjectState;

const PROJECT: usize = 40_000;

#[test]
fn test_evicts_oldest_until_below_low_watermark() {
    Scenario::new("evicts_oldest_until_below_low")
        .watermarks(90_000, 100_000)
        .with_project("a", PROJECT)
        .with_project("b", PROJECT)
        .with_project("c", PROJECT)
        .with_project("d", PROJECT)
        .run_swap()
        .assert_evicted(&["a", "b"])
        .assert_state("a", ProjectState::Swapped)
        .assert_state("b", ProjectState::Swapped)
        .assert_state("c", ProjectState::Present)
        .assert_state("d", ProjectState::Present)
        .assert_resident(2)
        .assert(Assertion::DiskUsageAtMost(90_000))
        .assert(Assertion::NotOnDisk("a".into()))
        .assert(Assertion::OnDisk("c".into()))
        .run()
        .expect("scenario should pass");
}

#[test]
fn test_below_high_watermark_does_nothing() {
    Scenario::new("below_high_does_nothing")
        .watermarks(10_000, 100_000)
        .with_project("a", PROJECT)
        .with_project("b", PROJECT)
        .run_swap()
        .assert_evicted(&[])
        .assert(Assertion::SkippedCount(0))
        .assert_resident(2)
        .run()
        .unwrap();
}

#[test]
fn test_recent_access_moves_project_to_back_of_queue() {
    Scenario::new("recent_access_protects")
        .watermarks(90_000, 100_000)
        .with_project("a", PROJECT)
        .with_project("b", PROJECT)
        .with_project("c", PROJECT)
        .wait_hours(1)
        .access("a")
        .run_swap()
        .assert_evicted(&["b"])
        .assert_state("a", ProjectState::Present)
        .run()
        .unwrap();
}

#[test]
fn test_min_projects_floor_wins_over_low_watermark() {
    Scenario::new("min_projects_floor")
        .watermarks(10_000, 100_000)
        .min_projects(3)
        .with_project("a", PROJECT)
        .with_project("b", PROJECT)
        .with_project("c", PROJECT)
        .with_project("d", PROJECT)
        .run_swap()
        .assert_evicted(&["a"])
        .assert_resident(3)
        .assert(Assertion::RunAborted(false))
        .run()
        .unwrap();
}

#[test]
fn test_swapped_projects_are_never_picked_again() {
    Scenario::new("swapped_not_repicked")
        .watermarks(50_000, 100_000)
        .with_project("a", PROJECT)
        .with_project("b", PROJECT)
        .with_project("c", PROJECT)
        .run_swap()
        .assert_evicted(&["a", "b"])
        .with_project("d", PROJECT)
        .with_project("e", PROJECT)
        .run_swap()
        .assert_evicted(&["c", "d"])
        .assert_state("e", ProjectState::Present)
        .assert_resident(1)
        .run()
        .unwrap();
}

#[test]
fn test_placeholder_rows_are_not_candidates() {
    Scenario::new("placeholders_ignored")
        .watermarks(10_000, 50_000)
        .with_project("a", PROJECT)
        .with_project("b", PROJECT)
        // A row at version 0 with data on disk is not a resident project.
        .assert(Assertion::Custom(Box::new(|bridge| {
            bridge
                .context_store
                .in_context_with_lock("pending", |scope| {
                    use bridge_core::DbStore;
                    bridge.db.set_latest_version_for_project(scope.context(), 0)
                })?;
            anyhow::ensure!(bridge.state("pending")? == ProjectState::NotPresent);
            Ok(())
        })))
        .run_swap()
        .assert_evicted(&["a"])
        .assert_state("pending", ProjectState::NotPresent)
        .run()
        .unwrap();
}
