//! Scripted delegate for tests.
//!
//! Downstream crates (engine, matcher) need a delegate whose replies are
//! known in advance and whose call count can be asserted — in particular
//! to prove that a cached name resolution performs zero oracle round
//! trips.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::Delegate;
use crate::error::{AgentError, AgentResult};
use crate::types::{AnalyzeRequest, TaskRequest};

/// A [`Delegate`] that replays pre-programmed replies.
///
/// Replies are consumed front-to-back; when the queue is empty the call
/// fails, which doubles as a "no more calls expected" assertion.
#[derive(Default)]
pub struct ScriptedDelegate {
    task_replies: Mutex<VecDeque<Value>>,
    analyze_replies: Mutex<VecDeque<Value>>,
    task_calls: AtomicUsize,
    analyze_calls: AtomicUsize,
}

impl ScriptedDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next `execute_task` call.
    pub fn push_task_reply(&self, reply: Value) {
        self.task_replies.lock().unwrap().push_back(reply);
    }

    /// Queue a reply for the next `analyze` call.
    pub fn push_analyze_reply(&self, reply: Value) {
        self.analyze_replies.lock().unwrap().push_back(reply);
    }

    /// Number of `execute_task` calls made so far.
    pub fn task_calls(&self) -> usize {
        self.task_calls.load(Ordering::SeqCst)
    }

    /// Number of `analyze` calls made so far.
    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delegate for ScriptedDelegate {
    async fn execute_task(&self, _request: &TaskRequest) -> AgentResult<Value> {
        self.task_calls.fetch_add(1, Ordering::SeqCst);
        self.task_replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::RequestFailed {
                reason: "no scripted task reply queued".into(),
            })
    }

    async fn analyze(&self, _request: &AnalyzeRequest) -> AgentResult<Value> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.analyze_replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::RequestFailed {
                reason: "no scripted analyze reply queued".into(),
            })
    }
}

// ── tests ────────────────────────────────────────────────────────────
