//! Fixed-size pool of worker threads with per-worker resources.
//!
//! The coordinator pushes tasks into a bounded queue; `n_workers` scoped threads pull from it
//! and push one [`TaskOutcome`] per task into a result channel.
//!
//! Each worker lazily opens its own resource (typically a database connection) through a
//! factory on its first task, and drops it when it exits. Nothing is shared between workers
//! except the read-only closures.
//!
//! A task that returns an error, or panics, produces a failed outcome. The worker logs it and
//! keeps going; after a panic it reopens its resource before the next task. Outcomes are
//! returned in completion order.
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    thread,
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, warn};

use crate::mosthosts_errors::MostHostsError;

#[derive(Debug)]
pub struct TaskOutcome<T, R> {
    /// Position of the task in the submitted list.
    pub index: usize,
    pub task: T,
    pub result: Result<R, MostHostsError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    n_workers: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl WorkerPool {
    pub fn new(n_workers: usize) -> Result<Self, MostHostsError> {
        if n_workers == 0 {
            return Err(MostHostsError::Config(
                "a worker pool needs at least one worker".into(),
            ));
        }
        Ok(WorkerPool { n_workers })
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Process every task on the pool.
    ///
    /// Arguments
    /// ---------
    /// * `tasks`: the work items
    /// * `open`: creates the per-worker resource; called from the worker thread
    /// * `work`: processes one task with the worker's resource
    ///
    /// Return
    /// ------
    /// * one [`TaskOutcome`] per task, in completion order
    /// * an error only if a worker thread could not be started
    pub fn run<T, R, S, F, W>(
        &self,
        tasks: Vec<T>,
        open: F,
        work: W,
    ) -> Result<Vec<TaskOutcome<T, R>>, MostHostsError>
    where
        T: Send,
        R: Send,
        F: Fn() -> Result<S, MostHostsError> + Sync,
        W: Fn(&mut S, &T) -> Result<R, MostHostsError> + Sync,
    {
        let n_tasks = tasks.len();
        let (tx_task, rx_task) = bounded::<(usize, T)>(self.n_workers * 2);
        let (tx_result, rx_result) = unbounded::<TaskOutcome<T, R>>();
        let open = &open;
        let work = &work;

        let outcomes = thread::scope(|scope| -> Result<Vec<TaskOutcome<T, R>>, MostHostsError> {
            for i in 0..self.n_workers {
                let rx = rx_task.clone();
                let tx = tx_result.clone();
                let name = format!("worker-{i}");
                thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || worker_loop(&name, rx, tx, open, work))?;
            }
            drop(rx_task);
            drop(tx_result);

            for (index, task) in tasks.into_iter().enumerate() {
                if tx_task.send((index, task)).is_err() {
                    error!("All workers have exited, {} tasks not submitted", n_tasks - index);
                    break;
                }
            }
            drop(tx_task);

            Ok(rx_result.iter().collect())
        })?;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        debug!(
            "Worker pool finished: {} outcomes for {n_tasks} tasks, {failed} failed",
            outcomes.len()
        );
        Ok(outcomes)
    }
}

fn worker_loop<T, R, S, F, W>(
    name: &str,
    rx: Receiver<(usize, T)>,
    tx: Sender<TaskOutcome<T, R>>,
    open: &F,
    work: &W,
) where
    F: Fn() -> Result<S, MostHostsError>,
    W: Fn(&mut S, &T) -> Result<R, MostHostsError>,
{
    debug!("{name} starting");
    let mut resource: Option<S> = None;

    for (index, task) in rx.iter() {
        if resource.is_none() {
            match panic::catch_unwind(AssertUnwindSafe(open)) {
                Ok(Ok(r)) => resource = Some(r),
                Ok(Err(e)) => {
                    let result = Err(MostHostsError::WorkerFailed(format!(
                        "{name} could not open its resource: {e}"
                    )));
                    error!("{name}: task #{index} not run, resource unavailable: {e}");
                    if tx.send(TaskOutcome { index, task, result }).is_err() {
                        break;
                    }
                    continue;
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    error!("{name}: panic while opening its resource: {msg}");
                    let result = Err(MostHostsError::WorkerFailed(format!(
                        "{name} panicked while opening its resource: {msg}"
                    )));
                    if tx.send(TaskOutcome { index, task, result }).is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let Some(r) = resource.as_mut() else {
            continue;
        };
        let result = match panic::catch_unwind(AssertUnwindSafe(|| work(r, &task))) {
            Ok(result) => result,
            Err(payload) => {
                resource = None;
                Err(MostHostsError::WorkerFailed(format!(
                    "{name} panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }
        };
        if let Err(e) = &result {
            warn!("{name}: task #{index} failed: {e}");
        }
        if tx.send(TaskOutcome { index, task, result }).is_err() {
            break;
        }
    }
    debug!("{name} exiting");
}

#[cfg(test)]
mod worker_pool_test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_failures_are_isolated() {
        let opened = AtomicUsize::new(0);
        let pool = WorkerPool::new(3).unwrap();
        let mut outcomes = pool
            .run(
                (0..20).collect::<Vec<u32>>(),
                || {
                    opened.fetch_add(1, Ordering::SeqCst);
                    Ok(0usize)
                },
                |count: &mut usize, task: &u32| {
                    *count += 1;
                    match *task {
                        5 => Err(MostHostsError::NoMatchFound(format!("task {task}"))),
                        7 => panic!("boom"),
                        t => Ok(t * 2),
                    }
                },
            )
            .unwrap();

        assert_eq!(outcomes.len(), 20);
        outcomes.sort_by_key(|o| o.index);
        for outcome in &outcomes {
            match outcome.task {
                5 => assert!(outcome.result.as_ref().unwrap_err().is_no_match()),
                7 => assert!(matches!(
                    outcome.result,
                    Err(MostHostsError::WorkerFailed(ref msg)) if msg.contains("boom")
                )),
                t => assert_eq!(*outcome.result.as_ref().unwrap(), t * 2),
            }
        }
        // one resource per worker at most, plus one reopened after the panic
        assert!(opened.load(Ordering::SeqCst) <= 4);
    }

    #[test]
    fn test_unavailable_resource_fails_every_task() {
        let pool = WorkerPool::new(2).unwrap();
        let outcomes = pool
            .run(
                vec!["a", "b", "c"],
                || -> Result<(), MostHostsError> {
                    Err(MostHostsError::Config("no database".into()))
                },
                |_: &mut (), task: &&str| Ok(task.len()),
            )
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.result, Err(MostHostsError::WorkerFailed(_)))));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(WorkerPool::new(0).is_err());
    }
}
