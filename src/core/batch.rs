use futures_util::future::join_all;
use std::future::Future;
use tokio::sync::Semaphore;

/// Maps `f` over `items` with at most `max_workers` futures in flight.
///
/// A counting semaphore gates each unit of work; the permit guard releases
/// on every exit path. Results come back in input order and per-item
/// failures are the caller's concern; the batch itself never aborts.
pub async fn bounded_map<T, R, F, Fut>(items: Vec<T>, max_workers: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let gate = Semaphore::new(max_workers.max(1));
    let tasks = items.into_iter().map(|item| {
        let work = f(item);
        let gate = &gate;
        async move {
            let _permit = gate.acquire().await.expect("semaphore is never closed");
            work.await
        }
    });
    join_all(tasks).await
}
