use crate::harness::{Assertion, Scenario};
use bridge_core::ProjectState;

fn fixture_round_trip(name: &str, method: &str) {
    Scenario::new(name)
        .compression(method)
        .with_fixture_project("repo", "sample_repo", 42)
        .evict("repo")
        .assert_state("repo", ProjectState::Swapped)
        .assert(Assertion::NotOnDisk("repo".into()))
        .assert(Assertion::SwapBlobExists("repo".into()))
        .assert(Assertion::Version {
            name: "repo".into(),
            version: 42,
        })
        .restore("repo")
        .assert_state("repo", ProjectState::Present)
        .assert(Assertion::MatchesFixture {
            project: "repo".into(),
            fixture: "sample_repo".into(),
        })
        .assert(Assertion::NoSwapBlob("repo".into()))
        .assert(Assertion::Version {
            name: "repo".into(),
            version: 42,
        })
        .run()
        .expect("round trip should preserve the repository");
}

#[test]
fn test_bzip2_round_trip_preserves_repository() {
    fixture_round_trip("bzip2_round_trip", "bzip2");
}

#[test]
fn test_gzip_round_trip_preserves_repository() {
    fixture_round_trip("gzip_round_trip", "gzip");
}

#[test]
fn test_restore_after_restart() {
    Scenario::new("restore_after_restart")
        .with_fixture_project("repo", "sample_repo", 7)
        .evict("repo")
        .restart()
        .assert_state("repo", ProjectState::Swapped)
        .access("repo")
        .assert_state("repo", ProjectState::Present)
        .assert(Assertion::MatchesFixture {
            project: "repo".into(),
            fixture: "sample_repo".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_access_restores_and_refreshes_recency() {
    Scenario::new("access_restores")
        .watermarks(90_000, 100_000)
        .with_project("a", 40_000)
        .with_project("b", 40_000)
        .with_project("c", 40_000)
        .run_swap()
        .assert_evicted(&["a"])
        .wait_hours(1)
        .access("a")
        .assert(Assertion::OnDisk("a".into()))
        .assert_resident(3)
        .run_swap()
        .assert_evicted(&["b"])
        .assert_state("a", ProjectState::Present)
        .run()
        .unwrap();
}

#[test]
fn test_restore_edits_survive_next_eviction() {
    Scenario::new("edits_survive")
        .with_fixture_project("repo", "sample_repo", 1)
        .evict("repo")
        .access("repo")
        .assert(Assertion::Custom(Box::new(|bridge| {
            use bridge_core::RepoStore;
            let file = bridge.repo.root().join("repo").join("CHANGELOG");
            std::fs::write(file, b"v2\n")?;
            Ok(())
        })))
        .register("repo", 2)
        .evict("repo")
        .restore("repo")
        .assert(Assertion::FileContent {
            project: "repo".into(),
            path: "CHANGELOG".into(),
            content: b"v2\n".to_vec(),
        })
        .assert(Assertion::Version {
            name: "repo".into(),
            version: 2,
        })
        .run()
        .unwrap();
}
