use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinSet};

use crate::error::DatafactError;

/// Concurrent pipelines per factory request.
pub const PIPELINE_MAX_CONCURRENCY: usize = 5;

/// Concurrent submissions per injection request.
pub const SUBMIT_MAX_CONCURRENCY: usize = 20;

/// Outcome of a join-all fan-out.
///
/// `results[i]` belongs to input item `i` whatever order the tasks finished
/// in; failed items leave `None`. `errors` is in completion order.
#[derive(Debug)]
pub struct FanOutOutcome<T> {
    pub results: Vec<Option<T>>,
    pub errors: Vec<String>,
    pub success_count: usize,
}

impl<T> FanOutOutcome<T> {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.success_count
    }
}

/// Aggregates every task writes to. Result slots are kept out of here:
/// each slot has exactly one writer and needs no lock.
#[derive(Default)]
struct Tally {
    success_count: usize,
    errors: Vec<String>,
}

fn lock(tally: &Mutex<Tally>) -> MutexGuard<'_, Tally> {
    tally.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs `work` once per item, at most `max_concurrency` at a time, and waits
/// for all of them.
///
/// A failing (or panicking) item is recorded as `"{label} {index} Fail: …"`
/// and never affects its siblings. There is no early return.
pub async fn run_all<I, T, F, Fut>(
    items: Vec<I>,
    max_concurrency: usize,
    label: &'static str,
    work: F,
) -> FanOutOutcome<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, DatafactError>> + Send + 'static,
{
    let total = items.len();
    let start = Instant::now();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let tally = Arc::new(Mutex::new(Tally::default()));
    let work = Arc::new(work);

    let mut set = JoinSet::new();
    // Task id → item index, so a panic can be pinned on the right slot.
    let mut task_index: HashMap<TaskId, usize> = HashMap::with_capacity(total);

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let tally = tally.clone();
        let work = work.clone();

        let abort_handle = set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                lock(&tally)
                    .errors
                    .push(format!("{label} {index} Fail: admission gate closed"));
                return (index, None);
            };

            match work(index, item).await {
                Ok(value) => {
                    lock(&tally).success_count += 1;
                    (index, Some(value))
                }
                Err(e) => {
                    let message = e.user_message();
                    tracing::warn!(label, index, "fan-out item failed: {message}");
                    lock(&tally)
                        .errors
                        .push(format!("{label} {index} Fail: {message}"));
                    (index, None)
                }
            }
        });
        task_index.insert(abort_handle.id(), index);
    }

    let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, value)) => results[index] = value,
            Err(join_err) => {
                let index = task_index.get(&join_err.id()).copied();
                tracing::error!(label, ?index, "fan-out task died: {join_err}");
                let slot = index.map_or_else(|| "?".to_string(), |i| i.to_string());
                lock(&tally)
                    .errors
                    .push(format!("{label} {slot} Fail: task panicked"));
            }
        }
    }

    let Tally {
        success_count,
        errors,
    } = std::mem::take(&mut *lock(&tally));

    tracing::info!(
        label,
        total,
        success_count,
        failed = total - success_count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "fan-out complete"
    );

    FanOutOutcome {
        results,
        errors,
        success_count,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let outcome: FanOutOutcome<u32> =
            run_all(Vec::<u32>::new(), 3, "Task", |_, x| async move { Ok(x) }).await;
        assert_eq!(outcome.total(), 0);
        assert_eq!(outcome.success_count, 0);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped_to_one() {
        let outcome = run_all(vec![1, 2, 3], 0, "Task", |_, x| async move { Ok(x * 2) }).await;
        assert_eq!(outcome.results, vec![Some(2), Some(4), Some(6)]);
    }

    #[tokio::test]
    async fn admission_gate_caps_active_tasks() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outcome = {
            let active = active.clone();
            let peak = peak.clone();
            run_all((0..12).collect(), 3, "Task", move |_, x: usize| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(x)
                }
            })
            .await
        };

        assert_eq!(outcome.success_count, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak was {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_task_is_attributed_to_its_index() {
        let outcome = run_all(vec![0, 1, 2], 2, "Task", |index, x: i32| async move {
            if index == 1 {
                panic!("boom");
            }
            Ok(x)
        })
        .await;

        assert_eq!(outcome.results, vec![Some(0), None, Some(2)]);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.errors, vec!["Task 1 Fail: task panicked".to_string()]);
    }
}
