use crate::harness::{Assertion, Scenario};
use bridge_core::{DbStore, ProjectState, RepoStore, SwapJob, SwapStore};
use std::thread;

#[test]
fn test_shutdown_rejects_new_operations() {
    Scenario::new("shutdown_rejects")
        .with_project("a", 1_000)
        .shutdown()
        .assert(Assertion::OperationRejected("a".into()))
        .restart()
        .access("a")
        .assert_state("a", ProjectState::Present)
        .run()
        .unwrap();
}

#[test]
fn test_operations_racing_a_swap_run_stay_consistent() {
    let names = ["p0", "p1", "p2", "p3", "p4", "p5"];
    let mut scenario = Scenario::new("racing_swap").watermarks(60_000, 100_000);
    for name in names {
        scenario = scenario.with_project(name, 30_000);
    }

    scenario
        .assert(Assertion::Custom(Box::new(move |bridge| {
            thread::scope(|s| {
                let swap = s.spawn(|| bridge.job.run_once());
                let users: Vec<_> = names
                    .iter()
                    .map(|name| {
                        s.spawn(move || {
                            for _ in 0..5 {
                                bridge.context_store.in_context_with_lock(name, |scope| {
                                    bridge.job.restore_if_swapped(scope.context())?;
                                    let ctx = scope.context();
                                    let at = bridge.db.get_latest_version_for_project(ctx)?;
                                    bridge.db.set_latest_version_for_project(ctx, at)
                                })?;
                            }
                            Ok::<_, bridge_core::BridgeError>(())
                        })
                    })
                    .collect();

                for user in users {
                    user.join().expect("user thread panicked")?;
                }
                swap.join().expect("swap thread panicked")?;
                Ok::<_, anyhow::Error>(())
            })?;

            // Whatever interleaving happened, each row agrees with the disk.
            for name in names {
                let on_disk = bridge.repo.exists(name);
                let blob = bridge.swap_store.contains(name);
                match bridge.state(name)? {
                    ProjectState::Present => {
                        anyhow::ensure!(on_disk && !blob, "{} present but on_disk={} blob={}", name, on_disk, blob)
                    }
                    ProjectState::Swapped => {
                        anyhow::ensure!(!on_disk && blob, "{} swapped but on_disk={} blob={}", name, on_disk, blob)
                    }
                    ProjectState::NotPresent => anyhow::bail!("{} lost its row", name),
                }
                anyhow::ensure!(bridge.db.get_project(name)?.map(|r| r.version) == Some(1));
            }
            Ok(())
        })))
        .run()
        .unwrap();
}
