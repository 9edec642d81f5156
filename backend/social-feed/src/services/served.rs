/// Primary/fallback execution for data-access calls
///
/// Each feed operation prefers a composed server-side procedure and, when that
/// fails for any reason, makes exactly one attempt through direct table
/// access. Callers receive which path produced the value but otherwise treat
/// both the same.
use std::future::Future;
use tracing::{error, warn};

use crate::error::FeedResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPath {
    Primary,
    Fallback,
}

/// A successful result tagged with the path that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served<T> {
    Primary(T),
    Fallback(T),
}

impl<T> Served<T> {
    pub fn path(&self) -> AccessPath {
        match self {
            Served::Primary(_) => AccessPath::Primary,
            Served::Fallback(_) => AccessPath::Fallback,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Served::Primary(v) | Served::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Served::Primary(v) | Served::Fallback(v) => v,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Served<U> {
        match self {
            Served::Primary(v) => Served::Primary(f(v)),
            Served::Fallback(v) => Served::Fallback(f(v)),
        }
    }
}

/// Run `primary`; on failure run `fallback` once.
///
/// The fallback is built lazily so its setup (identity lookups, query
/// construction) only happens when needed. When both fail, the fallback's
/// error is returned.
pub async fn primary_or_fallback<T, P, F, Fut>(
    operation: &'static str,
    primary: P,
    fallback: F,
) -> FeedResult<Served<T>>
where
    P: Future<Output = FeedResult<T>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = FeedResult<T>>,
{
    match primary.await {
        Ok(value) => Ok(Served::Primary(value)),
        Err(primary_err) => {
            warn!(
                "{} procedure failed ({}), falling back to direct table access",
                operation, primary_err
            );
            match fallback().await {
                Ok(value) => Ok(Served::Fallback(value)),
                Err(fallback_err) => {
                    error!(
                        "{} failed on both paths: primary={} fallback={}",
                        operation, primary_err, fallback_err
                    );
                    Err(fallback_err)
                }
            }
        }
    }
}
