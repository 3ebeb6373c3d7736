//! ---
//! rfr_section: "05-simulation"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "In-memory control plane implementing the remote client contract."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! An in-process stand-in for the network control plane.
//!
//! Route filters must be registered before rules can be written under them.
//! Writes are long-running: they become visible once their operation has been
//! polled [`InMemoryControlPlane::set_polls_to_complete`] times. Faults can be
//! queued per [`Verb`] and drift simulated with the `*_out_of_band` helpers.

mod recorder;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rfr_core::{
    ClientError, FilterKey, OperationHandle, PollStatus, RemoteClient, RemoteFilter, RemoteRule,
    Rule, RuleId, RuleKey,
};
use tracing::debug;
use uuid::Uuid;

pub use recorder::{CriticalSectionRecorder, WriteWindow};

pub const DEFAULT_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
pub const DEFAULT_LOCATION: &str = "westeurope";

/// Remote calls that faults can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    GetRule,
    PutRule,
    DeleteRule,
    GetFilter,
    Poll,
}

/// A failure to inject into the next call of a [`Verb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transport(String),
    Validation(String),
    Conflict(String),
    /// The call is accepted but its operation terminates as failed.
    OperationFailed(String),
    /// `get_rule` answers as if the rule did not exist, like a lagging replica.
    Absent,
    /// `get_rule` returns the rule without its identifier.
    Unidentified,
}

impl Fault {
    /// The error this fault raises, or `None` for faults that only shape a read.
    fn into_error(self) -> Option<ClientError> {
        match self {
            Fault::Transport(message) => Some(ClientError::Transport(message)),
            Fault::Validation(message) => Some(ClientError::Validation(message)),
            Fault::Conflict(message) => Some(ClientError::Conflict(message)),
            Fault::OperationFailed(reason) => Some(ClientError::Transport(reason)),
            Fault::Absent | Fault::Unidentified => None,
        }
    }
}

#[derive(Debug, Default)]
struct FilterEntry {
    location: String,
    rules: IndexMap<String, RemoteRule>,
}

#[derive(Debug)]
enum Mutation {
    Put(RuleKey, Rule),
    Delete(RuleKey),
}

#[derive(Debug)]
struct Inner {
    subscription_id: String,
    filters: Mutex<BTreeMap<FilterKey, FilterEntry>>,
    faults: Mutex<HashMap<Verb, VecDeque<Fault>>>,
    polls_to_complete: AtomicU32,
    calls: Mutex<HashMap<Verb, usize>>,
    writes: AtomicUsize,
    recorder: Arc<CriticalSectionRecorder>,
}

impl Inner {
    fn count(&self, verb: Verb) {
        *self.calls.lock().entry(verb).or_default() += 1;
    }

    fn take_fault(&self, verb: Verb) -> Option<Fault> {
        self.faults.lock().get_mut(&verb).and_then(VecDeque::pop_front)
    }

    fn take_error(&self, verb: Verb) -> Option<ClientError> {
        self.take_fault(verb).and_then(Fault::into_error)
    }

    fn rule_id(&self, key: &RuleKey) -> String {
        RuleId::new(self.subscription_id.clone(), key).to_string()
    }

    fn apply(&self, mutation: &Mutation) {
        let mut filters = self.filters.lock();
        match mutation {
            Mutation::Put(key, rule) => {
                if let Some(filter) = filters.get_mut(&key.filter_key()) {
                    filter.rules.insert(
                        key.name.clone(),
                        RemoteRule {
                            id: Some(self.rule_id(key)),
                            name: key.name.clone(),
                            properties: Some(rule.clone()),
                            provisioning_state: Some("Succeeded".into()),
                        },
                    );
                }
            }
            Mutation::Delete(key) => {
                if let Some(filter) = filters.get_mut(&key.filter_key()) {
                    filter.rules.shift_remove(&key.name);
                }
            }
        }
    }
}

/// Cloneable handle to a shared in-memory control plane.
#[derive(Debug, Clone)]
pub struct InMemoryControlPlane {
    inner: Arc<Inner>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION)
    }
}

impl InMemoryControlPlane {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscription_id: subscription_id.into(),
                filters: Mutex::new(BTreeMap::new()),
                faults: Mutex::new(HashMap::new()),
                polls_to_complete: AtomicU32::new(1),
                calls: Mutex::new(HashMap::new()),
                writes: AtomicUsize::new(0),
                recorder: Arc::new(CriticalSectionRecorder::new()),
            }),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.inner.subscription_id
    }

    /// Number of polls an operation needs before it reports a terminal status. Minimum one.
    pub fn set_polls_to_complete(&self, polls: u32) {
        self.inner
            .polls_to_complete
            .store(polls.max(1), Ordering::SeqCst);
    }

    pub fn register_filter(&self, key: &FilterKey) {
        self.register_filter_in(key, DEFAULT_LOCATION);
    }

    pub fn register_filter_in(&self, key: &FilterKey, location: &str) {
        self.inner
            .filters
            .lock()
            .entry(key.clone())
            .or_default()
            .location = location.to_owned();
    }

    /// Queue `fault` for the next call of `verb`. Faults are consumed in FIFO order.
    pub fn inject(&self, verb: Verb, fault: Fault) {
        self.inner
            .faults
            .lock()
            .entry(verb)
            .or_default()
            .push_back(fault);
    }

    /// Create or replace a rule without going through the client contract.
    pub fn insert_rule_out_of_band(&self, key: &RuleKey, rule: Rule) {
        self.register_filter(&key.filter_key());
        self.inner.apply(&Mutation::Put(key.clone(), rule));
    }

    /// Delete a rule without going through the client contract.
    pub fn remove_rule_out_of_band(&self, key: &RuleKey) -> bool {
        let mut filters = self.inner.filters.lock();
        filters
            .get_mut(&key.filter_key())
            .and_then(|filter| filter.rules.shift_remove(&key.name))
            .is_some()
    }

    pub fn rule(&self, key: &RuleKey) -> Option<RemoteRule> {
        self.inner
            .filters
            .lock()
            .get(&key.filter_key())
            .and_then(|filter| filter.rules.get(&key.name).cloned())
    }

    pub fn rule_id(&self, key: &RuleKey) -> String {
        self.inner.rule_id(key)
    }

    /// Number of write submissions (create-or-update and delete) accepted so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn call_count(&self, verb: Verb) -> usize {
        self.inner.calls.lock().get(&verb).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.inner.calls.lock().values().sum()
    }

    pub fn recorder(&self) -> Arc<CriticalSectionRecorder> {
        self.inner.recorder.clone()
    }

    fn submit(
        &self,
        verb: Verb,
        key: &RuleKey,
        mutation: Mutation,
    ) -> Result<Box<dyn OperationHandle>, ClientError> {
        self.inner.count(verb);
        let failure = match self.inner.take_fault(verb) {
            Some(Fault::OperationFailed(reason)) => Some(reason),
            Some(fault) => match fault.into_error() {
                Some(err) => return Err(err),
                None => None,
            },
            None => None,
        };
        if !self.inner.filters.lock().contains_key(&key.filter_key()) {
            return Err(ClientError::NotFound(key.filter_key().to_string()));
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let operation = PendingOperation {
            id: Uuid::new_v4().to_string(),
            inner: self.inner.clone(),
            remaining: AtomicU32::new(self.inner.polls_to_complete.load(Ordering::SeqCst)),
            mutation,
            failure,
            done: Mutex::new(None),
        };
        self.inner.recorder.enter(&operation.id, key);
        debug!(operation = %operation.id, rule = %key.name, ?verb, "write accepted");
        Ok(Box::new(operation))
    }
}

#[async_trait]
impl RemoteClient for InMemoryControlPlane {
    async fn get_rule(&self, key: &RuleKey) -> Result<Option<RemoteRule>, ClientError> {
        self.inner.count(Verb::GetRule);
        match self.inner.take_fault(Verb::GetRule) {
            Some(Fault::Absent) => Ok(None),
            Some(Fault::Unidentified) => Ok(self.rule(key).map(|rule| RemoteRule {
                id: None,
                ..rule
            })),
            Some(fault) => match fault.into_error() {
                Some(err) => Err(err),
                None => Ok(self.rule(key)),
            },
            None => Ok(self.rule(key)),
        }
    }

    async fn create_or_update_rule(
        &self,
        key: &RuleKey,
        rule: &Rule,
    ) -> Result<Box<dyn OperationHandle>, ClientError> {
        self.submit(Verb::PutRule, key, Mutation::Put(key.clone(), rule.clone()))
    }

    async fn delete_rule(&self, key: &RuleKey) -> Result<Box<dyn OperationHandle>, ClientError> {
        self.submit(Verb::DeleteRule, key, Mutation::Delete(key.clone()))
    }

    async fn get_filter(&self, key: &FilterKey) -> Result<Option<RemoteFilter>, ClientError> {
        self.inner.count(Verb::GetFilter);
        if let Some(err) = self.inner.take_error(Verb::GetFilter) {
            return Err(err);
        }
        let filters = self.inner.filters.lock();
        Ok(filters.get(key).map(|filter| RemoteFilter {
            id: Some(RuleId::filter_path(&self.inner.subscription_id, key)),
            name: key.route_filter.clone(),
            location: Some(filter.location.clone()),
            rules: filter.rules.values().cloned().collect(),
        }))
    }
}

#[derive(Debug)]
struct PendingOperation {
    id: String,
    inner: Arc<Inner>,
    remaining: AtomicU32,
    mutation: Mutation,
    failure: Option<String>,
    done: Mutex<Option<PollStatus>>,
}

#[async_trait]
impl OperationHandle for PendingOperation {
    fn describe(&self) -> String {
        format!("in-memory operation {}", self.id)
    }

    async fn poll(&self) -> Result<PollStatus, ClientError> {
        self.inner.count(Verb::Poll);
        if let Some(err) = self.inner.take_error(Verb::Poll) {
            return Err(err);
        }
        let mut done = self.done.lock();
        if let Some(status) = done.as_ref() {
            return Ok(status.clone());
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) > 1 {
            return Ok(PollStatus::InProgress);
        }
        let status = match &self.failure {
            Some(reason) => PollStatus::Failed(reason.clone()),
            None => {
                self.inner.apply(&self.mutation);
                PollStatus::Succeeded
            }
        };
        self.inner.recorder.exit(&self.id);
        *done = Some(status.clone());
        Ok(status)
    }
}
