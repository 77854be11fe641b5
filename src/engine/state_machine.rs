// src/engine/state_machine.rs

//! The five per-state task queues.
//!
//! One async mutex guards all queues. It is held only while tasks move
//! between queues, never across spawner or filesystem I/O: a worker pops a
//! task, works on it unlocked, then pushes it into its next queue. Tasks
//! popped but not yet pushed back are counted as in flight, so completion
//! can't be declared while a worker still holds one.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::result::ResultAggregator;
use crate::result::epoch_seconds;
use crate::task::{RuntimeTask, TaskResult};
use crate::types::{Outcome, TaskStatus};

pub const WAITING_REASON: &str = "WAITING";

/// Task counts per queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub requested: usize,
    pub triaging: usize,
    pub ready: usize,
    pub started: usize,
    pub finished: usize,
    pub in_flight: usize,
    /// Reserved execution slots (STARTED tasks plus tasks being started).
    pub running: usize,
}

#[derive(Debug, Default)]
struct Queues {
    requested: VecDeque<RuntimeTask>,
    triaging: VecDeque<RuntimeTask>,
    ready: VecDeque<RuntimeTask>,
    started: VecDeque<RuntimeTask>,
    finished: Vec<RuntimeTask>,
    in_flight: usize,
    running: usize,
}

impl Queues {
    fn pending(&mut self) -> Vec<RuntimeTask> {
        let mut out: Vec<RuntimeTask> = self.requested.drain(..).collect();
        out.extend(self.triaging.drain(..));
        out.extend(self.ready.drain(..));
        self.in_flight += out.len();
        out
    }
}

/// Outcome of trying to reserve a slot for the head of the READY queue.
#[derive(Debug)]
pub enum StartSlot {
    /// Nothing is ready.
    Empty,
    /// The concurrency cap is reached; the head stays queued as WAITING.
    Waiting,
    /// A slot was reserved for this task.
    Reserved(RuntimeTask),
}

#[derive(Debug)]
pub struct StateMachine {
    queues: Mutex<Queues>,
    aggregator: Arc<ResultAggregator>,
}

impl StateMachine {
    pub fn new(tasks: Vec<RuntimeTask>, aggregator: Arc<ResultAggregator>) -> Self {
        aggregator.expect_tests(tasks.len());
        let queues = Queues {
            requested: tasks.into(),
            ..Queues::default()
        };
        Self {
            queues: Mutex::new(queues),
            aggregator,
        }
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// All queues but FINISHED are empty and no worker holds a task.
    pub async fn complete(&self) -> bool {
        let q = self.queues.lock().await;
        q.requested.is_empty()
            && q.triaging.is_empty()
            && q.ready.is_empty()
            && q.started.is_empty()
            && q.in_flight == 0
    }

    pub async fn counts(&self) -> QueueCounts {
        let q = self.queues.lock().await;
        QueueCounts {
            requested: q.requested.len(),
            triaging: q.triaging.len(),
            ready: q.ready.len(),
            started: q.started.len(),
            finished: q.finished.len(),
            in_flight: q.in_flight,
            running: q.running,
        }
    }

    /// REQUESTED → TRIAGING.
    pub async fn bootstrap(&self) -> bool {
        let mut q = self.queues.lock().await;
        match q.requested.pop_front() {
            Some(mut task) => {
                task.set_status(TaskStatus::Triaging, None);
                q.triaging.push_back(task);
                true
            }
            None => false,
        }
    }

    pub async fn pop_triaging(&self) -> Option<RuntimeTask> {
        let mut q = self.queues.lock().await;
        let task = q.triaging.pop_front()?;
        q.in_flight += 1;
        Some(task)
    }

    /// TRIAGING → READY for a task held by a worker.
    pub async fn push_ready(&self, mut task: RuntimeTask) {
        task.set_status(TaskStatus::Ready, None);
        let mut q = self.queues.lock().await;
        q.in_flight -= 1;
        q.ready.push_back(task);
    }

    /// Reserve an execution slot for the head of READY, honouring `max`.
    pub async fn reserve_start(&self, max: usize) -> StartSlot {
        let mut q = self.queues.lock().await;
        if q.ready.is_empty() {
            return StartSlot::Empty;
        }
        let running = q.running;
        if running >= max {
            if let Some(head) = q.ready.front_mut() {
                if head.status_reason() != Some(WAITING_REASON) {
                    debug!(task = %head.id(), running, max, "concurrency cap reached");
                }
                head.set_status(TaskStatus::Ready, Some(WAITING_REASON));
            }
            return StartSlot::Waiting;
        }
        match q.ready.pop_front() {
            Some(task) => {
                q.running += 1;
                q.in_flight += 1;
                StartSlot::Reserved(task)
            }
            None => StartSlot::Empty,
        }
    }

    /// A task whose slot was reserved now runs: READY → STARTED.
    pub async fn push_started(&self, mut task: RuntimeTask) {
        task.set_status(TaskStatus::Started, None);
        if task.time_start.is_none() {
            task.time_start = Some(epoch_seconds());
            self.aggregator.start_test(&task);
        }
        let mut q = self.queues.lock().await;
        q.in_flight -= 1;
        q.started.push_back(task);
    }

    /// Put a monitored task back at the tail of STARTED.
    pub async fn requeue_started(&self, task: RuntimeTask) {
        let mut q = self.queues.lock().await;
        q.in_flight -= 1;
        q.started.push_back(task);
    }

    pub async fn pop_started(&self) -> Option<RuntimeTask> {
        let mut q = self.queues.lock().await;
        let task = q.started.pop_front()?;
        q.in_flight += 1;
        Some(task)
    }

    /// Take every STARTED task out for termination.
    pub async fn take_started(&self) -> Vec<RuntimeTask> {
        let mut q = self.queues.lock().await;
        let tasks: Vec<RuntimeTask> = q.started.drain(..).collect();
        q.in_flight += tasks.len();
        tasks
    }

    /// Move a held task to FINISHED with `result`.
    ///
    /// `held_slot` releases the execution slot the task occupied. The
    /// aggregator runs, and persists, outside the queue lock.
    pub async fn finish_task(
        &self,
        mut task: RuntimeTask,
        result: TaskResult,
        reason: Option<&str>,
        held_slot: bool,
    ) -> Outcome {
        let outcome = result.outcome;
        if task.finish(result, reason) {
            task.time_end = Some(epoch_seconds());
            if task.time_start.is_none() {
                task.time_start = task.time_end;
            }
            info!(
                task = %task.id(),
                outcome = %outcome,
                reason = task.result().and_then(|r| r.fail_reason.as_deref()).unwrap_or(""),
                "task finished"
            );
            self.aggregator.end_test(&task).await;
        }
        let final_outcome = task.outcome().unwrap_or(outcome);

        let mut q = self.queues.lock().await;
        q.in_flight -= 1;
        if held_slot {
            q.running = q.running.saturating_sub(1);
        }
        q.finished.push(task);
        final_outcome
    }

    /// Finish every REQUESTED, TRIAGING and READY task with `outcome`.
    pub async fn abort_pending(&self, outcome: Outcome, reason: &str) -> usize {
        let pending = self.queues.lock().await.pending();
        let count = pending.len();
        if count > 0 {
            info!(count, outcome = %outcome, reason, "aborting pending tasks");
        }
        for task in pending {
            let result = TaskResult::new(outcome).with_reason(reason);
            self.finish_task(task, result, Some(reason), false).await;
        }
        count
    }

    /// Finished tasks in creation order. Only meaningful once complete.
    pub fn into_finished(self) -> Vec<RuntimeTask> {
        let mut finished = self.queues.into_inner().finished;
        finished.sort_by_key(|t| t.position());
        finished
    }

    /// Snapshot of finished outcomes in creation order.
    pub async fn finished_outcomes(&self) -> Vec<(String, Option<Outcome>)> {
        let q = self.queues.lock().await;
        let mut out: Vec<_> = q
            .finished
            .iter()
            .map(|t| (t.position(), t.id().to_string(), t.outcome()))
            .collect();
        out.sort_by_key(|(p, _, _)| *p);
        out.into_iter().map(|(_, id, o)| (id, o)).collect()
    }
}
