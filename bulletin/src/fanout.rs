//! Bounded concurrent map that keeps successes and failures side by side.

use std::future::Future;

use futures::stream::{self, StreamExt};

#[derive(Debug)]
pub struct FanOut<K, T, E> {
    pub successes: Vec<(K, T)>,
    pub failures: Vec<(K, E)>,
}

impl<K, T, E> FanOut<K, T, E> {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

/// Run `f` over every input with at most `limit` futures in flight.
/// Results arrive in completion order, each tagged with its input.
pub async fn bounded<K, T, E, F, Fut>(inputs: Vec<K>, limit: usize, f: F) -> FanOut<K, T, E>
where
    K: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let results: Vec<(K, Result<T, E>)> = stream::iter(inputs.into_iter().map(|key| {
        let fut = f(key.clone());
        async move { (key, fut.await) }
    }))
    .buffer_unordered(limit.max(1))
    .collect()
    .await;

    let mut out = FanOut {
        successes: Vec::new(),
        failures: Vec::new(),
    };
    for (key, result) in results {
        match result {
            Ok(v) => out.successes.push((key, v)),
            Err(e) => out.failures.push((key, e)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = bounded((0..12).collect(), 3, |i: u32| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(i * 2)
            }
        })
        .await;

        assert_eq!(out.successes.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn splits_successes_and_failures() {
        let out = bounded(vec!["a", "bb", "ccc", "dddd"], 2, |s: &str| async move {
            if s.len() % 2 == 0 {
                Ok(s.len())
            } else {
                Err(format!("odd: {}", s))
            }
        })
        .await;

        assert_eq!(out.total(), 4);
        let mut ok: Vec<_> = out.successes.iter().map(|(k, _)| *k).collect();
        ok.sort();
        assert_eq!(ok, vec!["bb", "dddd"]);
        assert_eq!(out.failures.len(), 2);
    }

    #[tokio::test]
    async fn zero_limit_still_runs() {
        let out = bounded(vec![1, 2], 0, |i: i32| async move { Ok::<_, ()>(i) }).await;
        assert_eq!(out.successes.len(), 2);
    }
}
