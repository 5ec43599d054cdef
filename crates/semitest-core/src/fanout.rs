//! Parallel fan-out of independent per-family operations.
//!
//! Each branch runs on its own Tokio task so the latency of physically
//! independent channel families overlaps. Every branch always runs to
//! completion; there is no short-circuit on the first failure. Results are
//! collected in *declaration* order, never completion order, which makes the
//! reported failure deterministic:
//!
//! ```text
//!   branch[0] ──┐
//!   branch[1] ──┼──> join (declaration order) ──> flatten ──> first failure
//!   branch[2] ──┘
//! ```
//!
//! Failures that are not selected as the primary cause are logged at `warn`.

use crate::error::{TestError, TestResult};
use futures::future::BoxFuture;
use std::future::Future;
use tracing::Instrument;

/// Upper bound on branches per fan-out call: one per family or sub-phase.
pub const MAX_BRANCHES: usize = 4;

/// A named, not-yet-started operation.
pub struct Branch<T> {
    name: String,
    future: BoxFuture<'static, TestResult<T>>,
}

impl<T> Branch<T> {
    pub fn new<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = TestResult<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of one branch, tagged with its name.
#[derive(Debug)]
pub struct BranchOutcome<T> {
    pub name: String,
    pub result: TestResult<T>,
}

/// Builder and runner for one fan-out call.
pub struct FanOut<T> {
    branches: Vec<Branch<T>>,
}

impl<T> Default for FanOut<T> {
    fn default() -> Self {
        Self {
            branches: Vec::new(),
        }
    }
}

impl<T: Send + 'static> FanOut<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the next branch.
    pub fn branch<F>(mut self, name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = TestResult<T>> + Send + 'static,
    {
        self.branches.push(Branch::new(name, future));
        self
    }

    /// Declare the next branch from an already boxed [`Branch`].
    pub fn push(&mut self, branch: Branch<T>) {
        self.branches.push(branch);
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Run every branch concurrently and return each outcome in declaration order.
    pub async fn run(self) -> Vec<BranchOutcome<T>> {
        debug_assert!(
            self.branches.len() <= MAX_BRANCHES,
            "fan-out declared {} branches",
            self.branches.len()
        );

        let handles: Vec<_> = self
            .branches
            .into_iter()
            .map(|branch| {
                let span = tracing::debug_span!("fan_out_branch", branch = %branch.name);
                let handle = tokio::spawn(branch.future.instrument(span));
                (branch.name, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(TestError::BranchPanicked {
                    branch: name.clone(),
                    message: join_error.to_string(),
                }),
            };
            outcomes.push(BranchOutcome { name, result });
        }
        outcomes
    }

    /// Run every branch; fail with the first leaf failure in declaration order.
    ///
    /// On success the values are returned in declaration order.
    pub async fn join(self) -> TestResult<Vec<T>> {
        let (values, failures) = split_outcomes(self.run().await);
        match select_primary_failure(failures) {
            Some(primary) => Err(primary),
            None => Ok(values),
        }
    }

    /// Run every branch; fail with every failure bundled as `Aggregate`.
    ///
    /// Used where a caller nests fan-outs and wants the outer level to make
    /// the selection.
    pub async fn join_all(self) -> TestResult<Vec<T>> {
        let (values, failures) = split_outcomes(self.run().await);
        if failures.is_empty() {
            Ok(values)
        } else {
            Err(TestError::Aggregate(
                failures.into_iter().map(|(_, e)| e).collect(),
            ))
        }
    }
}

fn split_outcomes<T>(outcomes: Vec<BranchOutcome<T>>) -> (Vec<T>, Vec<(String, TestError)>) {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => values.push(value),
            Err(error) => failures.push((outcome.name, error)),
        }
    }
    (values, failures)
}

/// Flatten every failure and pick the first leaf.
///
/// `failures` must already be in declaration order. The remaining leaves are
/// logged, not returned.
pub fn select_primary_failure(failures: Vec<(String, TestError)>) -> Option<TestError> {
    let mut leaves = failures
        .into_iter()
        .flat_map(|(branch, error)| error.flatten().into_iter().map(move |leaf| (branch.clone(), leaf)));

    let (primary_branch, primary) = leaves.next()?;
    for (branch, suppressed) in leaves {
        tracing::warn!(
            branch = %branch,
            primary_branch = %primary_branch,
            error = %suppressed,
            "concurrent operation also failed"
        );
    }
    tracing::debug!(branch = %primary_branch, error = %primary, "fan-out failed");
    Some(primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverError, DriverErrorKind};
    use crate::family::ChannelFamily;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn failure(family: ChannelFamily, message: &str) -> TestError {
        TestError::family(
            family,
            DriverError::new("mock", DriverErrorKind::Hardware, message),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_branches_run_even_when_one_fails() {
        let ran = Arc::new(AtomicUsize::new(0));
        let (a, b) = (ran.clone(), ran.clone());

        let result = FanOut::new()
            .branch("smu", async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(failure(ChannelFamily::SourceMeasure, "boom"))
            })
            .branch("ppmu", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                b.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .join()
            .await;

        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn primary_failure_is_first_in_declaration_order() {
        // The second branch fails first in wall-clock time.
        let result: TestResult<Vec<()>> = FanOut::new()
            .branch("smu", async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(failure(ChannelFamily::SourceMeasure, "slow"))
            })
            .branch("ppmu", async { Err(failure(ChannelFamily::DigitalPpmu, "fast")) })
            .join()
            .await;

        assert_eq!(
            result.unwrap_err(),
            failure(ChannelFamily::SourceMeasure, "slow")
        );
    }

    #[tokio::test]
    async fn nested_aggregates_are_flattened_before_selection() {
        let result: TestResult<Vec<()>> = FanOut::new()
            .branch("ok", async { Ok(()) })
            .branch("nested", async {
                Err(TestError::Aggregate(vec![
                    failure(ChannelFamily::DigitalPpmu, "inner-1"),
                    failure(ChannelFamily::SourceMeasure, "inner-2"),
                ]))
            })
            .join()
            .await;

        assert_eq!(
            result.unwrap_err(),
            failure(ChannelFamily::DigitalPpmu, "inner-1")
        );
    }

    #[tokio::test]
    async fn join_all_keeps_every_failure() {
        let result: TestResult<Vec<()>> = FanOut::new()
            .branch("a", async { Err(failure(ChannelFamily::SourceMeasure, "a")) })
            .branch("b", async { Err(failure(ChannelFamily::DigitalPpmu, "b")) })
            .join_all()
            .await;

        match result.unwrap_err() {
            TestError::Aggregate(inner) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn values_come_back_in_declaration_order() {
        let values = FanOut::new()
            .branch("first", async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(1)
            })
            .branch("second", async { Ok(2) })
            .join()
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn panicking_branch_is_reported() {
        let result: TestResult<Vec<()>> = FanOut::new()
            .branch("explodes", async { panic!("driver crashed") })
            .join()
            .await;
        assert!(matches!(
            result.unwrap_err(),
            TestError::BranchPanicked { branch, .. } if branch == "explodes"
        ));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn suppressed_failures_are_logged() {
        let _ = FanOut::<()>::new()
            .branch("a", async { Err(failure(ChannelFamily::SourceMeasure, "first")) })
            .branch("b", async { Err(failure(ChannelFamily::DigitalPpmu, "second")) })
            .join()
            .await;
        assert!(logs_contain("concurrent operation also failed"));
    }
}
