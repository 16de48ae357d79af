//! Size and time windowed batching of stream notifications.
//!
//! [`bundle`] is a simpler alternative to the [`Publisher`](crate::publisher::Publisher):
//! it coalesces consecutive notifications of the same kind into bundles
//! without tracking dependencies between them.

use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;

/// Flush rules of a bundler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerConfig {
    /// Largest number of notifications in one bundle.
    pub max_bundle_size: usize,
    /// Longest time a bundle stays open after its first notification.
    pub max_interval: Option<Duration>,
    /// Number of notifications the source produces, if known.
    pub total: Option<usize>,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            max_bundle_size: 1,
            max_interval: None,
            total: None,
        }
    }
}

impl BundlerConfig {
    pub fn new(max_bundle_size: usize) -> Self {
        Self {
            max_bundle_size,
            ..Self::default()
        }
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

/// Consecutive notifications of one kind. `start` is the index of the first
/// notification in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Bundle<T, E> {
    Data { start: usize, items: Vec<T> },
    Errors { start: usize, errors: Vec<E> },
}

impl<T, E> Bundle<T, E> {
    fn first(start: usize, item: Result<T, E>) -> Self {
        match item {
            Ok(item) => Self::Data {
                start,
                items: vec![item],
            },
            Err(error) => Self::Errors {
                start,
                errors: vec![error],
            },
        }
    }

    /// Adds a notification of the same kind, or hands it back.
    fn try_push(&mut self, item: Result<T, E>) -> Result<(), Result<T, E>> {
        match (self, item) {
            (Self::Data { items, .. }, Ok(item)) => items.push(item),
            (Self::Errors { errors, .. }, Err(error)) => errors.push(error),
            (_, item) => return Err(item),
        }
        Ok(())
    }

    pub fn start(&self) -> usize {
        match self {
            Self::Data { start, .. } | Self::Errors { start, .. } => *start,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Data { items, .. } => items.len(),
            Self::Errors { errors, .. } => errors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }
}

/// Groups the notifications of `source` into bundles.
///
/// A bundle is flushed when it holds `max_bundle_size` notifications, when
/// `max_interval` has passed since its first notification, when a
/// notification of the other kind arrives, and when `total` notifications
/// have been seen. The output ends after the total is reached, or when the
/// source ends.
pub fn bundle<S, T, E>(source: S, config: BundlerConfig) -> impl Stream<Item = Bundle<T, E>>
where
    S: Stream<Item = Result<T, E>>,
{
    let max_bundle_size = config.max_bundle_size.max(1);

    async_stream::stream! {
        let mut source = std::pin::pin!(source);
        let mut open: Option<Bundle<T, E>> = None;
        let mut deadline: Option<Instant> = None;
        let mut seen = 0;

        loop {
            let next = match deadline {
                Some(at) => tokio::select! {
                    next = source.next() => Some(next),
                    () = tokio::time::sleep_until(at) => None,
                },
                None => Some(source.next().await),
            };
            let item = match next {
                // Interval expired.
                None => {
                    if let Some(bundle) = open.take() {
                        yield bundle;
                    }
                    deadline = None;
                    continue;
                }
                Some(None) => break,
                Some(Some(item)) => item,
            };

            let index = seen;
            seen += 1;
            let rejected = match open.as_mut() {
                Some(bundle) => bundle.try_push(item).err(),
                None => Some(item),
            };
            if let Some(item) = rejected {
                if let Some(bundle) = open.take() {
                    yield bundle;
                }
                open = Some(Bundle::first(index, item));
                deadline = config.max_interval.map(|interval| Instant::now() + interval);
            }

            let total_reached = config.total.is_some_and(|total| seen >= total);
            if open.as_ref().is_some_and(|bundle| bundle.len() >= max_bundle_size) || total_reached {
                if let Some(bundle) = open.take() {
                    yield bundle;
                }
                deadline = None;
            }
            if total_reached {
                break;
            }
        }

        if let Some(bundle) = open.take() {
            yield bundle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn data(start: usize, items: &[i32]) -> Bundle<i32, &'static str> {
        Bundle::Data {
            start,
            items: items.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_flushes_on_size() {
        let source = stream::iter([Ok(1), Ok(2), Ok(3), Ok(4), Ok(5)]);
        let bundles: Vec<_> = bundle(source, BundlerConfig::new(2)).collect().await;
        assert_eq!(bundles, vec![data(0, &[1, 2]), data(2, &[3, 4]), data(4, &[5])]);
    }

    #[tokio::test]
    async fn test_flushes_on_kind_switch() {
        let source = stream::iter([Ok(1), Err("boom"), Err("again"), Ok(2)]);
        let bundles: Vec<_> = bundle(source, BundlerConfig::new(10)).collect().await;
        assert_eq!(
            bundles,
            vec![
                data(0, &[1]),
                Bundle::Errors {
                    start: 1,
                    errors: vec!["boom", "again"],
                },
                data(3, &[2]),
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_at_total() {
        let source = stream::iter([Ok(1), Ok(2)]).chain(stream::pending());
        let bundles: Vec<_> = bundle(source, BundlerConfig::new(10).with_total(2))
            .collect()
            .await;
        assert_eq!(bundles, vec![data(0, &[1, 2])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval() {
        let source = async_stream::stream! {
            yield Ok(1);
            yield Ok(2);
            tokio::time::sleep(Duration::from_millis(50)).await;
            yield Ok(3);
        };
        let config = BundlerConfig::new(10).with_max_interval(Duration::from_millis(10));
        let bundles: Vec<Bundle<i32, &str>> = bundle(source, config).collect().await;
        assert_eq!(bundles, vec![data(0, &[1, 2]), data(2, &[3])]);
    }
}
