//! Fan-in barrier for the stat phase.
//!
//! A chord is opened per job with the set of addons whose stat tasks were
//! fanned out. Each stat task reports exactly one outcome; the report that
//! completes the set releases the barrier. Duplicate reports (redelivery) and
//! reports for jobs with no open chord are ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::models::AggregateStatResult;

#[derive(Debug, PartialEq)]
pub enum Release {
    /// Other stat tasks are still outstanding, or the report was discarded.
    Waiting,
    /// Every addon reported success; results in fan-out order.
    Ready(Vec<AggregateStatResult>),
    /// Every addon reported, at least one failed.
    Failed(Vec<String>),
}

struct Pending {
    addons: Vec<String>,
    results: HashMap<String, AggregateStatResult>,
    failed: HashSet<String>,
}

impl Pending {
    fn reported(&self) -> usize {
        self.results.len() + self.failed.len()
    }

    fn has_reported(&self, addon: &str) -> bool {
        self.results.contains_key(addon) || self.failed.contains(addon)
    }
}

#[derive(Clone, Default)]
pub struct Chord {
    inner: Arc<Mutex<HashMap<String, Pending>>>,
}

impl Chord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for one report per addon. Returns false, leaving the
    /// running round untouched, if the job already has an open chord.
    pub async fn open(&self, job_id: &str, addons: Vec<String>) -> bool {
        let mut map = self.inner.lock().await;
        if map.contains_key(job_id) {
            return false;
        }
        map.insert(
            job_id.to_string(),
            Pending {
                addons,
                results: HashMap::new(),
                failed: HashSet::new(),
            },
        );
        true
    }

    /// Record one stat outcome; `None` means the stat task failed.
    pub async fn report(
        &self,
        job_id: &str,
        addon: &str,
        outcome: Option<AggregateStatResult>,
    ) -> Release {
        let mut map = self.inner.lock().await;
        let Some(pending) = map.get_mut(job_id) else {
            return Release::Waiting;
        };
        if !pending.addons.iter().any(|a| a == addon) || pending.has_reported(addon) {
            return Release::Waiting;
        }

        match outcome {
            Some(result) => {
                pending.results.insert(addon.to_string(), result);
            }
            None => {
                pending.failed.insert(addon.to_string());
            }
        }

        if pending.reported() < pending.addons.len() {
            return Release::Waiting;
        }

        let Some(mut done) = map.remove(job_id) else {
            return Release::Waiting;
        };
        if !done.failed.is_empty() {
            let mut failed: Vec<String> = done.failed.into_iter().collect();
            failed.sort();
            return Release::Failed(failed);
        }

        let results = done
            .addons
            .iter()
            .filter_map(|addon| done.results.remove(addon))
            .collect();
        Release::Ready(results)
    }

    pub async fn is_open(&self, job_id: &str) -> bool {
        self.inner.lock().await.contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, size: u64) -> AggregateStatResult {
        AggregateStatResult::new(
            name,
            name,
            vec![AggregateStatResult::file("/f", "f", size)],
        )
    }

    #[tokio::test]
    async fn releases_once_all_addons_report() {
        let chord = Chord::new();
        chord
            .open("job-1", vec!["github".into(), "osfstorage".into()])
            .await;

        assert_eq!(
            chord.report("job-1", "osfstorage", Some(stat("osfstorage", 5))).await,
            Release::Waiting
        );
        let release = chord.report("job-1", "github", Some(stat("github", 3))).await;

        match release {
            Release::Ready(results) => {
                let names: Vec<_> = results.iter().map(|r| r.target_name.as_str()).collect();
                assert_eq!(names, vec!["github", "osfstorage"]);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        assert!(!chord.is_open("job-1").await);
    }

    #[tokio::test]
    async fn failure_is_reported_after_all_arrive() {
        let chord = Chord::new();
        chord.open("job-2", vec!["a".into(), "b".into()]).await;

        assert_eq!(chord.report("job-2", "a", None).await, Release::Waiting);
        assert_eq!(
            chord.report("job-2", "b", Some(stat("b", 1))).await,
            Release::Failed(vec!["a".into()])
        );
    }

    #[tokio::test]
    async fn duplicate_reports_are_ignored() {
        let chord = Chord::new();
        chord.open("job-3", vec!["a".into(), "b".into()]).await;

        assert_eq!(chord.report("job-3", "a", Some(stat("a", 1))).await, Release::Waiting);
        assert_eq!(chord.report("job-3", "a", Some(stat("a", 1))).await, Release::Waiting);
        assert!(chord.is_open("job-3").await);
        assert!(matches!(
            chord.report("job-3", "b", Some(stat("b", 1))).await,
            Release::Ready(_)
        ));

        // Late redelivery after release.
        assert_eq!(chord.report("job-3", "b", Some(stat("b", 1))).await, Release::Waiting);
    }

    #[tokio::test]
    async fn second_open_keeps_running_round() {
        let chord = Chord::new();
        assert!(chord.open("job-5", vec!["a".into(), "b".into()]).await);
        assert_eq!(chord.report("job-5", "a", Some(stat("a", 1))).await, Release::Waiting);

        assert!(!chord.open("job-5", vec!["a".into(), "b".into()]).await);
        assert!(matches!(
            chord.report("job-5", "b", Some(stat("b", 2))).await,
            Release::Ready(results) if results.len() == 2
        ));

        // Released chords can be opened again.
        assert!(chord.open("job-5", vec!["a".into()]).await);
    }

    #[tokio::test]
    async fn unknown_addon_is_ignored() {
        let chord = Chord::new();
        chord.open("job-4", vec!["a".into()]).await;
        assert_eq!(chord.report("job-4", "zzz", None).await, Release::Waiting);
        assert!(chord.is_open("job-4").await);
    }
}
