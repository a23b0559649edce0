//! Value-based pagination resampling
//!
//! Consumers page by cursor value (`after`) rather than by offset. A request
//! for `count` items is split into backend reads of at most
//! [`MAX_CHUNK_SIZE`] items, each one starting where the previous one left
//! off, until the request is satisfied or the backend runs dry.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest chunk ever requested from the backend in one read.
pub const MAX_CHUNK_SIZE: u64 = 100;

/// Count used when the consumer asks for nothing in particular.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Pagination selector as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Exclusive start cursor, empty for "from the beginning"
    #[serde(default)]
    pub after: String,

    /// Requested item count, `<= 0` for the default
    #[serde(default)]
    pub count: i64,
}

/// A parsed pagination selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub after: Option<i64>,
    pub count: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            after: None,
            count: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn from_selector(selector: Option<&Pagination>) -> Result<Self> {
        let Some(p) = selector else {
            return Ok(Self::default());
        };

        let after = if p.after.is_empty() {
            None
        } else {
            Some(
                p.after
                    .parse::<i64>()
                    .map_err(|_| Error::invalid("invalid pagination 'after'"))?,
            )
        };
        let count = if p.count <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            p.count as u64
        };

        Ok(Self { after, count })
    }
}

/// Fulfil a `(start, count)` request by calling `fetch` repeatedly.
///
/// `fetch(first, start, chunk)` reads at most `chunk` items beginning after
/// `start`, delivers them to the consumer, and returns how many it delivered
/// together with the cursor for the next read. `first` is true only on the
/// first call, so the producer can attach extra data to the first chunk.
pub async fn resample<C, F, Fut>(start: C, count: u64, fetch: F) -> Result<()>
where
    F: FnMut(bool, C, u64) -> Fut,
    Fut: Future<Output = Result<(usize, C)>>,
{
    resample_chunked(MAX_CHUNK_SIZE, start, count, fetch).await
}

/// [`resample`] with an explicit chunk size cap.
pub async fn resample_chunked<C, F, Fut>(
    max_chunk: u64,
    mut start: C,
    count: u64,
    mut fetch: F,
) -> Result<()>
where
    F: FnMut(bool, C, u64) -> Fut,
    Fut: Future<Output = Result<(usize, C)>>,
{
    let max_chunk = max_chunk.max(1);
    let mut sent: u64 = 0;
    let mut first = true;

    while sent < count {
        let chunk = (count - sent).min(max_chunk);
        let (n, next) = fetch(first, start, chunk).await?;
        let n = n as u64;
        if n < chunk {
            return Ok(());
        }

        first = false;
        sent += n;
        start = next;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A backend holding the values `1..=total`.
    fn backend(total: i64) -> Vec<i64> {
        (1..=total).collect()
    }

    fn read(data: &[i64], after: Option<i64>, chunk: u64) -> Vec<i64> {
        data.iter()
            .copied()
            .filter(|v| after.is_none_or(|a| *v > a))
            .take(chunk as usize)
            .collect()
    }

    async fn run(total: i64, after: Option<i64>, count: u64, max: u64) -> (Vec<i64>, Vec<(bool, u64)>) {
        let data = backend(total);
        let out = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(Vec::new()));

        resample_chunked(max, after, count, |first, start, chunk| {
            let items = read(&data, start, chunk);
            let out = out.clone();
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push((first, chunk));
                let next = items.last().copied().or(start);
                let n = items.len();
                out.lock().unwrap().extend(items);
                Ok((n, next))
            }
        })
        .await
        .unwrap();

        let out = out.lock().unwrap().clone();
        let calls = calls.lock().unwrap().clone();
        (out, calls)
    }

    #[tokio::test]
    async fn test_chunks_are_capped() {
        let (out, calls) = run(1000, None, 250, 100).await;
        assert_eq!(out, (1..=250).collect::<Vec<_>>());
        assert_eq!(calls, vec![(true, 100), (false, 100), (false, 50)]);
    }

    #[tokio::test]
    async fn test_stops_when_backend_runs_dry() {
        let (out, calls) = run(130, Some(20), 500, 100).await;
        assert_eq!(out, (21..=130).collect::<Vec<_>>());
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_backend() {
        let (out, calls) = run(0, None, 10, 100).await;
        assert!(out.is_empty());
        assert_eq!(calls, vec![(true, 10)]);
    }

    #[tokio::test]
    async fn test_zero_count_never_fetches() {
        let (_, calls) = run(10, None, 0, 100).await;
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn test_resampling_matches_unbounded_read() {
        let data = backend(37);
        let whole = read(&data, None, u64::MAX);
        for max in 1..=40 {
            for count in [1, 5, 36, 37, 100] {
                let (out, _) = run(37, None, count, max).await;
                let want: Vec<i64> = whole.iter().copied().take(count as usize).collect();
                assert_eq!(out, want, "max={max} count={count}");
            }
        }
    }

    #[tokio::test]
    async fn test_first_error_aborts() {
        let mut calls = 0;
        let res = resample(None::<i64>, 500, |_, _, chunk| {
            calls += 1;
            let fail = calls == 2;
            async move {
                if fail {
                    Err(Error::Unavailable("database error".into()))
                } else {
                    Ok((chunk as usize, Some(1)))
                }
            }
        })
        .await;
        assert_eq!(res, Err(Error::Unavailable("database error".into())));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_selector_defaults() {
        assert_eq!(PageRequest::from_selector(None).unwrap(), PageRequest::default());

        let p = Pagination {
            after: String::new(),
            count: 0,
        };
        assert_eq!(
            PageRequest::from_selector(Some(&p)).unwrap(),
            PageRequest {
                after: None,
                count: 100
            }
        );

        let p = Pagination {
            after: "1234".into(),
            count: -5,
        };
        assert_eq!(
            PageRequest::from_selector(Some(&p)).unwrap(),
            PageRequest {
                after: Some(1234),
                count: 100
            }
        );

        let p = Pagination {
            after: "12".into(),
            count: 7,
        };
        assert_eq!(PageRequest::from_selector(Some(&p)).unwrap().count, 7);
    }

    #[test]
    fn test_selector_rejects_garbage_cursor() {
        let p = Pagination {
            after: "yesterday".into(),
            count: 10,
        };
        assert_eq!(
            PageRequest::from_selector(Some(&p)),
            Err(Error::InvalidArgument("invalid pagination 'after'".into()))
        );
    }
}
