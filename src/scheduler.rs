//! Deferred statement execution.
//!
//! Each database owns one scheduling loop fed through an unbounded channel.
//! Statements become eligible at `enqueued_at + delay` and run one at a time
//! in eligibility order; statements eligible at the same instant run in
//! submission order. When the database is destroyed the channel closes and
//! statements still waiting are discarded.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use flume::{Receiver, Sender};
use futures_util::{
    future::{select, Either},
    pin_mut,
};

use crate::{
    db::{DatabaseKey, TdbError},
    id::StatementId,
    mutation::MutationResult,
    observability::{log_debug, log_error, log_info},
    privacy::PrivacyGate,
};

/// Acknowledgement returned by `execute_async`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncTicket {
    id: StatementId,
    eligible_at: Instant,
}

impl AsyncTicket {
    pub fn id(&self) -> StatementId {
        self.id
    }

    /// Earliest instant at which the statement may run.
    pub fn eligible_at(&self) -> Instant {
        self.eligible_at
    }
}

/// Counters of one node's scheduling loops.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SchedulerMetrics {
    pub scheduled: u64,
    pub executed: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl SchedulerMetrics {
    fn record(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Executed(_) => self.executed = self.executed.saturating_add(1),
            RunOutcome::Failed(_) => self.failed = self.failed.saturating_add(1),
            RunOutcome::Discarded => self.discarded = self.discarded.saturating_add(1),
        }
    }
}

/// A statement waiting for its turn.
pub(crate) struct PendingStatement {
    pub(crate) id: StatementId,
    pub(crate) query: String,
    pub(crate) publish: bool,
    /// Gate of the submitting session, used when publishing.
    pub(crate) gate: Arc<PrivacyGate>,
    pub(crate) enqueued_at: Instant,
    pub(crate) eligible_at: Instant,
}

pub(crate) enum RunOutcome {
    Executed(MutationResult),
    Failed(TdbError),
    /// The database was destroyed before the statement ran.
    Discarded,
}

pub(crate) type Runner = Arc<dyn Fn(&PendingStatement) -> RunOutcome + Send + Sync>;

/// Submission side of a database's scheduling loop. Dropping it stops the
/// loop.
pub(crate) struct Scheduler {
    sender: Sender<PendingStatement>,
    metrics: Arc<Mutex<SchedulerMetrics>>,
}

impl Scheduler {
    /// Create a scheduler and the loop that drains it. The caller spawns
    /// [`SchedulerLoop::listen`].
    pub(crate) fn new(
        key: DatabaseKey,
        runner: Runner,
        metrics: Arc<Mutex<SchedulerMetrics>>,
    ) -> (Self, SchedulerLoop) {
        let (sender, receiver) = flume::unbounded();
        (
            Scheduler {
                sender,
                metrics: metrics.clone(),
            },
            SchedulerLoop {
                key,
                receiver,
                pending: BTreeMap::new(),
                next_seq: 0,
                runner,
                metrics,
            },
        )
    }

    /// Queue `query` to run after `delay`.
    pub(crate) fn submit(
        &self,
        id: StatementId,
        query: String,
        publish: bool,
        gate: Arc<PrivacyGate>,
        delay: Duration,
    ) -> Result<AsyncTicket, TdbError> {
        let enqueued_at = Instant::now();
        let eligible_at = enqueued_at + delay;
        self.sender
            .send(PendingStatement {
                id,
                query,
                publish,
                gate,
                enqueued_at,
                eligible_at,
            })
            .map_err(|_| TdbError::NotOpen)?;
        self.metrics
            .lock()
            .expect("scheduler metrics mutex should not be poisoned")
            .scheduled += 1;
        Ok(AsyncTicket { id, eligible_at })
    }
}

pub(crate) struct SchedulerLoop {
    key: DatabaseKey,
    receiver: Receiver<PendingStatement>,
    /// Keyed by (eligible instant, submission sequence).
    pending: BTreeMap<(Instant, u64), PendingStatement>,
    next_seq: u64,
    runner: Runner,
    metrics: Arc<Mutex<SchedulerMetrics>>,
}

impl SchedulerLoop {
    pub(crate) async fn listen(mut self) {
        loop {
            self.run_due();
            let next_due = self.pending.keys().next().map(|(at, _)| *at);
            let received = match next_due {
                None => self.receiver.recv_async().await.ok(),
                Some(at) => {
                    let recv = self.receiver.recv_async();
                    let sleep = tokio::time::sleep_until(at.into());
                    pin_mut!(recv);
                    pin_mut!(sleep);
                    match select(recv, sleep).await {
                        Either::Left((statement, _)) => statement.ok(),
                        Either::Right(_) => continue,
                    }
                }
            };
            let Some(statement) = received else {
                break;
            };
            self.pending
                .insert((statement.eligible_at, self.next_seq), statement);
            self.next_seq += 1;
        }

        let discarded = self.pending.len() as u64;
        if discarded > 0 {
            self.metrics
                .lock()
                .expect("scheduler metrics mutex should not be poisoned")
                .discarded += discarded;
            log_info!(
                component = "scheduler",
                event = "scheduler_discarded",
                database = %self.key,
                statements = discarded,
            );
        }
        log_debug!(
            component = "scheduler",
            event = "scheduler_stopped",
            database = %self.key,
        );
    }

    fn run_due(&mut self) {
        let now = Instant::now();
        let later = self.pending.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.pending, later);
        for statement in due.into_values() {
            let outcome = (self.runner)(&statement);
            if let RunOutcome::Failed(err) = &outcome {
                log_error!(
                    component = "scheduler",
                    event = "statement_failed",
                    database = %self.key,
                    statement_id = %statement.id,
                    waited_ms = statement.enqueued_at.elapsed().as_millis() as u64,
                    error = %err,
                );
            }
            self.metrics
                .lock()
                .expect("scheduler metrics mutex should not be poisoned")
                .record(&outcome);
        }
    }
}
