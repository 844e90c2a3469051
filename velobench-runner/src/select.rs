//! Revision Selection
//!
//! Decides which revisions a pass visits and in what order. Policies
//! thin the history (every revision, one per day, only the newest, or
//! every Nth); orders decide traversal (chronological, newest-first, or
//! a multi-resolution sweep that fills in detail progressively).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::repo::Revision;

/// Which revisions of the history to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Every revision
    All,
    /// The last revision of each calendar day
    Eod,
    /// Only the newest revision
    Last,
    /// Every Nth revision, counted from the oldest
    EveryNth(usize),
}

impl RunPolicy {
    /// Parse a policy name: "all", "eod", "last", or a positive integer.
    pub fn parse(s: &str) -> Result<Self, SelectorError> {
        match s.trim() {
            "all" => Ok(RunPolicy::All),
            "eod" => Ok(RunPolicy::Eod),
            "last" => Ok(RunPolicy::Last),
            other => match other.parse::<usize>() {
                Ok(0) => Err(SelectorError::UnknownPolicy(other.to_string())),
                Ok(n) => Ok(RunPolicy::EveryNth(n)),
                Err(_) => Err(SelectorError::UnknownPolicy(other.to_string())),
            },
        }
    }
}

/// Traversal order over the selected revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrder {
    /// Oldest to newest
    Normal,
    /// Newest to oldest
    Reverse,
    /// Coarse sweep first, then progressively finer interleaving
    Multires,
}

impl RunOrder {
    /// Parse an order name: "normal", "reverse", or "multires".
    pub fn parse(s: &str) -> Result<Self, SelectorError> {
        match s.trim() {
            "normal" => Ok(RunOrder::Normal),
            "reverse" => Ok(RunOrder::Reverse),
            "multires" => Ok(RunOrder::Multires),
            other => Err(SelectorError::UnknownOrder(other.to_string())),
        }
    }
}

/// Errors from revision selection.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// Not a recognized policy name or positive stride
    #[error("unknown run policy: {0:?} (expected \"all\", \"eod\", \"last\", or a positive integer)")]
    UnknownPolicy(String),

    /// Not a recognized order name
    #[error("unknown run order: {0:?} (expected \"normal\", \"reverse\", or \"multires\")")]
    UnknownOrder(String),
}

/// Multi-resolution traversal of `0..n`.
///
/// Emits every index exactly once: first a coarse pass at a
/// power-of-two stride, then repeatedly halves the stride, emitting
/// only indices not yet seen. A long history gets rough coverage
/// quickly and detail later.
fn multires_order(n: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(n);
    let mut seen = vec![false; n];
    let mut stride = n.next_power_of_two();
    while stride >= 1 {
        let mut i = 0;
        while i < n {
            if !seen[i] {
                seen[i] = true;
                order.push(i);
            }
            i += stride;
        }
        if stride == 1 {
            break;
        }
        stride /= 2;
    }
    order
}

/// Select and order the revisions a pass will visit.
///
/// The history is first sorted by commit timestamp (ties keep input
/// order), truncated to `start_date` if given, thinned by `policy`,
/// then arranged by `order`.
pub fn select_revisions(
    mut history: Vec<Revision>,
    policy: RunPolicy,
    order: RunOrder,
    start_date: Option<DateTime<Utc>>,
) -> Vec<Revision> {
    history.sort_by_key(|r| r.timestamp);

    if let Some(start) = start_date {
        history.retain(|r| r.timestamp >= start);
    }

    let selected: Vec<Revision> = match policy {
        RunPolicy::All => history,
        RunPolicy::Last => history.into_iter().last().into_iter().collect(),
        RunPolicy::Eod => {
            let mut kept: Vec<Revision> = Vec::new();
            for rev in history {
                match kept.last_mut() {
                    Some(prev) if prev.timestamp.date_naive() == rev.timestamp.date_naive() => {
                        *prev = rev;
                    }
                    _ => kept.push(rev),
                }
            }
            kept
        }
        // Stride anchors at the oldest revision; the newest is only
        // included when the stride lands on it.
        RunPolicy::EveryNth(n) => history.into_iter().step_by(n).collect(),
    };

    match order {
        RunOrder::Normal => selected,
        RunOrder::Reverse => selected.into_iter().rev().collect(),
        RunOrder::Multires => {
            let order = multires_order(selected.len());
            let mut slots: Vec<Option<Revision>> = selected.into_iter().map(Some).collect();
            order.into_iter().filter_map(|i| slots[i].take()).collect()
        }
    }
}
