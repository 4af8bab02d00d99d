//! Join-all fan-out: slot ordering, error ordering and failure isolation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use datafact::error::DatafactError;
use datafact::fanout::{self, SUBMIT_MAX_CONCURRENCY};

#[tokio::test]
async fn results_are_index_ordered_under_shuffled_completion() {
    let delays: Vec<u64> = vec![50, 5, 35, 0, 20, 10, 45, 15];
    let outcome = fanout::run_all(delays.clone(), 8, "Task", |index, ms| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(format!("item-{index}"))
    })
    .await;

    assert_eq!(outcome.total(), delays.len());
    assert_eq!(outcome.success_count, delays.len());
    let expected: Vec<Option<String>> = (0..delays.len())
        .map(|i| Some(format!("item-{i}")))
        .collect();
    assert_eq!(outcome.results, expected);
}

#[tokio::test]
async fn errors_listed_in_completion_order() {
    // Index 0 fails last, index 2 fails first.
    let delays: Vec<u64> = vec![60, 0, 5, 30];
    let outcome = fanout::run_all(delays, 4, "Row", |index, ms| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        if index % 2 == 0 {
            Err(DatafactError::Other(format!("bad row {index}")))
        } else {
            Ok(index)
        }
    })
    .await;

    assert_eq!(outcome.results, vec![None, Some(1), None, Some(3)]);
    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failed_count(), 2);
    assert_eq!(
        outcome.errors,
        vec!["Row 2 Fail: bad row 2", "Row 0 Fail: bad row 0"]
    );
}

#[tokio::test]
async fn submission_limit_caps_in_flight_rows() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (active.clone(), peak.clone());

    let items: Vec<u32> = (0..50).collect();
    let outcome = fanout::run_all(items, SUBMIT_MAX_CONCURRENCY, "Row", move |_, x| {
        let (active, peak) = (a.clone(), p.clone());
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(x)
        }
    })
    .await;

    assert_eq!(outcome.success_count, 50);
    assert!(peak.load(Ordering::SeqCst) <= SUBMIT_MAX_CONCURRENCY);
}
