use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, GetterFailure, Result};
use crate::options::EngineOptions;

/// Per-call knobs for a single `get`.
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl LookupOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Identifies a search context: a config and the index of its first
/// visible layer.
pub type ViewKey = (Uuid, usize);

/// State shared by every nested resolution triggered from one top-level
/// lookup: deadline, cancellation, the active template chain, the
/// placeholder memo and the subtree entry stack.
#[derive(Debug)]
pub struct Lookup {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    max_depth: usize,
    state: Mutex<LookupState>,
}

#[derive(Debug, Default)]
struct LookupState {
    active: Vec<(Uuid, String)>,
    memo: HashMap<(ViewKey, String), Value>,
    subtrees: Vec<(Uuid, String)>,
}

impl Lookup {
    pub fn new(options: &LookupOptions, engine: &EngineOptions) -> Self {
        let timeout = options
            .timeout
            .or_else(|| engine.default_timeout_ms.map(Duration::from_millis));
        Self {
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            timeout,
            cancel: options.cancel.clone().unwrap_or_else(CancellationToken::new),
            max_depth: engine.max_depth,
            state: Mutex::new(LookupState::default()),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn state(&self) -> MutexGuard<'_, LookupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` of `config` as being expanded. Re-entering a key that is
    /// already on the chain is a cycle. The chain holds at most `max_depth`
    /// keys, the requested key included.
    pub fn enter_expansion(&self, config: Uuid, key: &str) -> Result<ExpansionGuard<'_>> {
        let mut state = self.state();
        if state
            .active
            .iter()
            .any(|(owner, active)| *owner == config && active == key)
        {
            let mut chain = state
                .active
                .iter()
                .map(|(_, active)| active.clone())
                .collect::<Vec<_>>();
            chain.push(key.to_owned());
            return Err(Error::CyclicTemplate { chain });
        }
        if state.active.len() >= self.max_depth {
            return Err(Error::DepthExceeded {
                path: key.to_owned(),
                limit: self.max_depth,
            });
        }
        state.active.push((config, key.to_owned()));
        Ok(ExpansionGuard {
            lookup: self,
            entry: (config, key.to_owned()),
        })
    }

    pub fn enter_subtree(&self, config: Uuid, path: &str) -> Result<SubtreeGuard<'_>> {
        let mut state = self.state();
        if state
            .subtrees
            .iter()
            .any(|(owner, entered)| *owner == config && entered == path)
        {
            return Err(Error::CyclicSubtree {
                config: config.to_string(),
                path: path.to_owned(),
            });
        }
        if state.subtrees.len() >= self.max_depth {
            return Err(Error::DepthExceeded {
                path: path.to_owned(),
                limit: self.max_depth,
            });
        }
        state.subtrees.push((config, path.to_owned()));
        Ok(SubtreeGuard {
            lookup: self,
            entry: (config, path.to_owned()),
        })
    }

    pub fn memoized(&self, view: ViewKey, key: &str) -> Option<Value> {
        self.state().memo.get(&(view, key.to_owned())).cloned()
    }

    pub fn remember(&self, view: ViewKey, key: &str, value: Value) {
        self.state().memo.insert((view, key.to_owned()), value);
    }

    /// Runs a getter future against this lookup's deadline and cancellation
    /// token. Expiry and cancellation are errors, never misses.
    pub async fn run_guarded<F, T>(&self, key: &str, getter: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let cancelled = self.cancel.cancelled();
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = cancelled => Err(Error::getter(key, getter, GetterFailure::Cancelled)),
                    outcome = tokio::time::timeout_at(deadline, work) => match outcome {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(key, getter, "getter exceeded lookup deadline");
                            Err(Error::getter(
                                key,
                                getter,
                                GetterFailure::DeadlineExceeded(self.timeout.unwrap_or_default()),
                            ))
                        }
                    },
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancelled => Err(Error::getter(key, getter, GetterFailure::Cancelled)),
                    result = work => result,
                }
            }
        }
    }
}

pub struct ExpansionGuard<'a> {
    lookup: &'a Lookup,
    entry: (Uuid, String),
}

impl Drop for ExpansionGuard<'_> {
    fn drop(&mut self) {
        remove_last(&mut self.lookup.state().active, &self.entry);
    }
}

pub struct SubtreeGuard<'a> {
    lookup: &'a Lookup,
    entry: (Uuid, String),
}

impl Drop for SubtreeGuard<'_> {
    fn drop(&mut self) {
        remove_last(&mut self.lookup.state().subtrees, &self.entry);
    }
}

// Getters may run sibling lookups concurrently, so guards can drop out of
// push order.
fn remove_last(entries: &mut Vec<(Uuid, String)>, entry: &(Uuid, String)) {
    if let Some(position) = entries.iter().rposition(|candidate| candidate == entry) {
        entries.remove(position);
    }
}
