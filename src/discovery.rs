//! Concurrent fan-out of probes over a set of targets and bounded aggregation
//! of their results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::error::ConnectorError;

/// Identifies one dispatch so that late events from superseded rounds can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Performs the connect + fetch for one target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Info: Send + 'static;

    async fn probe(&self, target: &str) -> Result<Self::Info, ConnectorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<I> {
    Success(I),
    Error(String),
    Timeout,
}

impl<I> Outcome<I> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionResult<I> {
    pub target: String,
    pub outcome: Outcome<I>,
}

/// One entry per target, sorted by target name.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOutcome<I> {
    pub results: Vec<ConnectionResult<I>>,
    pub timed_out: BTreeSet<String>,
}

impl<I> Default for AggregationOutcome<I> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            timed_out: BTreeSet::new(),
        }
    }
}

impl<I> AggregationOutcome<I> {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn error_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Error(_)))
            .count()
    }

    pub fn get(&self, target: &str) -> Option<&Outcome<I>> {
        self.results
            .binary_search_by(|r| r.target.as_str().cmp(target))
            .ok()
            .map(|idx| &self.results[idx].outcome)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sorted, de-duplicated copy of the target list.
pub fn normalize_targets(targets: &[String]) -> Vec<String> {
    targets
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Spawns one task per target. Each task delivers exactly one result, even if the probe panics.
pub fn dispatch<C: Connector>(
    connector: Arc<C>,
    targets: &[String],
) -> mpsc::Receiver<ConnectionResult<C::Info>> {
    let (tx, rx) = mpsc::channel(targets.len().max(1));

    for target in targets {
        let connector = Arc::clone(&connector);
        let tx = tx.clone();
        let target = target.clone();
        tokio::spawn(async move {
            let probe = AssertUnwindSafe(connector.probe(&target)).catch_unwind();
            let outcome = match probe.await {
                Ok(Ok(info)) => Outcome::Success(info),
                Ok(Err(err)) => Outcome::Error(err.to_string()),
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    warn!(target = %target, "probe panicked: {msg}");
                    Outcome::Error(format!("panic: {msg}"))
                }
            };
            // Receiver is gone once the round's deadline has passed.
            if tx.send(ConnectionResult { target: target.clone(), outcome }).await.is_err() {
                debug!(target = %target, "discarding result that arrived after the deadline");
            }
        });
    }

    rx
}

/// Drains results until every target has reported or the deadline passes.
pub async fn collect<I>(
    mut rx: mpsc::Receiver<ConnectionResult<I>>,
    targets: &[String],
    deadline: Instant,
) -> AggregationOutcome<I> {
    let mut pending: BTreeSet<String> = targets.iter().cloned().collect();
    let mut received: BTreeMap<String, Outcome<I>> = BTreeMap::new();
    let mut closed = false;

    while !pending.is_empty() {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(result)) => {
                if pending.remove(&result.target) {
                    received.insert(result.target, result.outcome);
                }
            }
            Ok(None) => {
                closed = true;
                break;
            }
            Err(_) => break,
        }
    }
    drop(rx);

    let mut timed_out = BTreeSet::new();
    for target in pending {
        if closed {
            received.insert(
                target,
                Outcome::Error("worker exited without reporting".to_string()),
            );
        } else {
            received.insert(target.clone(), Outcome::Timeout);
            timed_out.insert(target);
        }
    }

    AggregationOutcome {
        results: received
            .into_iter()
            .map(|(target, outcome)| ConnectionResult { target, outcome })
            .collect(),
        timed_out,
    }
}

/// Runs one bounded round: dispatch to every target, then collect until `budget` elapses.
pub async fn aggregate<C: Connector>(
    connector: Arc<C>,
    targets: &[String],
    budget: Duration,
) -> AggregationOutcome<C::Info> {
    let targets = normalize_targets(targets);
    if targets.is_empty() {
        return AggregationOutcome::default();
    }

    let deadline = Instant::now() + budget;
    let rx = dispatch(connector, &targets);
    let outcome = collect(rx, &targets, deadline).await;

    info!(
        targets = targets.len(),
        ok = outcome.success_count(),
        errors = outcome.error_count(),
        timeouts = outcome.timed_out.len(),
        "aggregation round finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for Scripted {
        type Info = String;

        async fn probe(&self, target: &str) -> Result<String, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match target {
                t if t.starts_with("slow") => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(t.to_string())
                }
                t if t.starts_with("bad") => Err(ConnectorError::Login {
                    target: t.to_string(),
                    reason: "401".to_string(),
                }),
                t if t.starts_with("boom") => panic!("probe exploded"),
                t => Ok(format!("info:{t}")),
            }
        }
    }

    /// Answers only after 500 ms and counts the answers it produced.
    struct Lagging {
        answered: AtomicUsize,
    }

    #[async_trait]
    impl Connector for Lagging {
        type Info = String;

        async fn probe(&self, target: &str) -> Result<String, ConnectorError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.answered.fetch_add(1, Ordering::SeqCst);
            Ok(target.to_string())
        }
    }

    fn scripted() -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicUsize::new(0),
        })
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_targets_return_immediately() {
        let connector = scripted();
        let outcome = aggregate(Arc::clone(&connector), &[], Duration::from_secs(60)).await;
        assert!(outcome.results.is_empty());
        assert!(outcome.timed_out.is_empty());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_target_gets_exactly_one_sorted_result() {
        let connector = scripted();
        let targets = names(&["c", "bad-a", "a", "boom-x", "a"]);
        let outcome = aggregate(Arc::clone(&connector), &targets, Duration::from_secs(5)).await;

        let got: Vec<_> = outcome.results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(got, vec!["a", "bad-a", "boom-x", "c"]);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.get("a"), Some(&Outcome::Success("info:a".to_string())));
        assert!(matches!(outcome.get("bad-a"), Some(Outcome::Error(e)) if e.contains("401")));
        assert!(matches!(outcome.get("boom-x"), Some(Outcome::Error(e)) if e.contains("probe exploded")));
        assert!(outcome.timed_out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_targets_time_out_at_the_deadline() {
        let targets = names(&["fast", "slow-1", "slow-2"]);
        let started = Instant::now();
        let outcome = aggregate(scripted(), &targets, Duration::from_secs(60)).await;

        assert!(Instant::now() - started >= Duration::from_secs(60));
        assert_eq!(outcome.success_count(), 1);
        assert_eq!(
            outcome.timed_out,
            ["slow-1", "slow-2"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(outcome.get("slow-1"), Some(&Outcome::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_is_discarded_after_the_deadline() {
        let connector = Arc::new(Lagging {
            answered: AtomicUsize::new(0),
        });
        let outcome = aggregate(Arc::clone(&connector), &names(&["x"]), Duration::from_millis(100)).await;
        assert_eq!(outcome.get("x"), Some(&Outcome::Timeout));
        assert_eq!(connector.answered.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // The worker answered, found the receiver gone and exited quietly.
        assert_eq!(connector.answered.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&connector), 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.get("x"), Some(&Outcome::Timeout));
        assert!(outcome.timed_out.contains("x"));
    }

    #[tokio::test]
    async fn closed_channel_reports_missing_targets_as_errors() {
        let (tx, rx) = mpsc::channel::<ConnectionResult<String>>(2);
        tx.send(ConnectionResult {
            target: "a".to_string(),
            outcome: Outcome::Success("ok".to_string()),
        })
        .await
        .unwrap();
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = collect(rx, &names(&["a", "b"]), deadline).await;
        assert!(outcome.get("a").is_some_and(Outcome::is_success));
        assert!(matches!(outcome.get("b"), Some(Outcome::Error(_))));
        assert!(outcome.timed_out.is_empty());
    }
}
