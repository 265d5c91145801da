//! The session state machine.
//!
//! ```text
//! Idle --message--> Running --tool request--> ToolExec --success--> Running
//!                     |
//!                     | tool raises NeedsApproval
//!                     v
//!                 Interrupted --resume(approve)--> Running (call re-invoked once)
//!                     |       --resume(reject)---> Running (rejection message)
//!                     |       --cancel-----------> Cancelled
//! ```
//!
//! Every transition and message append is flushed to the thread store
//! before it is acknowledged. Per-thread execution is serialized: a
//! second concurrent request observes `Busy`.

use crate::error::{OlavError, Result};
use crate::session::provider::LlmProvider;
use crate::session::store::{ThreadStore, ThreadSummary};
use crate::session::thread::{Interrupt, Message, Role, Thread, ThreadState};
use crate::tools::{ToolContext, ToolRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Upper bound on provider/tool rounds within one message turn.
const MAX_TOOL_ROUNDS: usize = 16;

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Completed { output: String },
    /// The thread is now `Interrupted`, awaiting `resume`.
    Interrupted(Interrupt),
    Rejected,
    /// A retried resume of an already-executed fingerprint; nothing ran.
    AlreadyApplied,
}

#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// The provider produced a final reply.
    Replied { text: String },
    /// A write-class tool call suspended the thread.
    Interrupted(Interrupt),
}

pub struct SessionManager {
    store: Arc<dyn ThreadStore>,
    tools: Arc<ToolRegistry>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ThreadStore>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            store,
            tools,
            locks: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub async fn create_thread(&self, client_id: &str) -> Result<Thread> {
        let thread = Thread::new(client_id);
        self.store.create(&thread).await?;
        Ok(thread)
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.store
            .load(thread_id)
            .await?
            .ok_or_else(|| OlavError::not_found(format!("thread '{thread_id}'")))
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        self.store.list().await
    }

    /// The cancellation token shared by everything in flight on a thread.
    pub fn cancellation(&self, thread_id: &str) -> CancellationToken {
        self.cancels
            .lock()
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    /// Append a message, flushing before acknowledgment.
    pub async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let _guard = self.acquire(thread_id)?;
        let mut thread = self.get_thread(thread_id).await?;
        // A cancelled thread accepts new input and starts a fresh turn.
        if thread.state == ThreadState::Cancelled {
            thread.state = ThreadState::Idle;
            self.reset_cancel(thread_id);
        }
        let message = Message::new(role, content);
        thread.push(message.clone());
        self.store.save(&thread).await?;
        Ok(message)
    }

    /// Run one tool call on a thread. A `NeedsApproval` signal suspends
    /// the thread instead of failing.
    pub async fn run_tool(
        &self,
        thread_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome> {
        let guard = self.acquire(thread_id)?;
        let mut thread = self.get_thread(thread_id).await?;
        if thread.state == ThreadState::Interrupted {
            return Err(OlavError::Busy(format!(
                "thread '{thread_id}' is awaiting approval"
            )));
        }
        if thread.state == ThreadState::Cancelled {
            thread.state = ThreadState::Idle;
            self.reset_cancel(thread_id);
        }

        self.transition(&mut thread, ThreadState::Running).await?;
        let outcome = match self
            .invoke_tool(&mut thread, tool_name, arguments, None)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Tool failures end the turn; the thread stays usable.
                self.transition(&mut thread, ThreadState::Idle).await?;
                return Err(e);
            }
        };
        match &outcome {
            ToolOutcome::Interrupted(_) => {}
            _ => self.transition(&mut thread, ThreadState::Idle).await?,
        }
        drop(guard);
        Ok(outcome)
    }

    /// Resolve a pending interrupt.
    ///
    /// Approval re-invokes exactly the recorded call; retrying the resume
    /// after it ran reports `AlreadyApplied` without executing again.
    /// Rejection returns the thread to `Running` with a rejection note.
    pub async fn resume(&self, thread_id: &str, approve: bool) -> Result<ToolOutcome> {
        let _guard = self.acquire(thread_id)?;
        let mut thread = self.get_thread(thread_id).await?;

        let Some(interrupt) = thread.pending_interrupt.clone() else {
            // Idempotent retry of a resolved interrupt.
            if approve {
                if let Some(last) = &thread.last_interrupt {
                    if thread.executed_fingerprints.contains(&last.fingerprint) {
                        return Ok(ToolOutcome::AlreadyApplied);
                    }
                }
            }
            return Err(OlavError::not_found(format!(
                "no pending interrupt on thread '{thread_id}'"
            )));
        };

        if !approve {
            thread.pending_interrupt = None;
            thread.last_interrupt = Some(interrupt.clone());
            thread.push(Message::new(
                Role::System,
                format!("operator rejected '{}'", interrupt.tool_name),
            ));
            self.transition(&mut thread, ThreadState::Idle).await?;
            return Ok(ToolOutcome::Rejected);
        }

        if thread.executed_fingerprints.contains(&interrupt.fingerprint) {
            thread.pending_interrupt = None;
            thread.last_interrupt = Some(interrupt);
            self.transition(&mut thread, ThreadState::Idle).await?;
            return Ok(ToolOutcome::AlreadyApplied);
        }

        self.transition(&mut thread, ThreadState::Running).await?;
        let outcome = match self
            .invoke_tool(
                &mut thread,
                &interrupt.tool_name,
                interrupt.arguments.clone(),
                Some(interrupt.fingerprint.clone()),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // The approved call failed; keep the interrupt pending so
                // the operator may retry or reject it.
                self.transition(&mut thread, ThreadState::Interrupted).await?;
                return Err(e);
            }
        };

        if let ToolOutcome::Interrupted(_) = &outcome {
            // The re-invoked call raised a different approval requirement
            // (its inputs shifted); the fresh interrupt stays pending.
            thread.last_interrupt = Some(interrupt);
            self.store.save(&thread).await?;
            return Ok(outcome);
        }

        if let ToolOutcome::Completed { .. } = &outcome {
            thread.executed_fingerprints.insert(interrupt.fingerprint.clone());
        }
        thread.pending_interrupt = None;
        thread.last_interrupt = Some(interrupt);
        self.transition(&mut thread, ThreadState::Idle).await?;
        Ok(outcome)
    }

    /// Cancel a thread: the token propagates to in-flight work and the
    /// state becomes `Cancelled`. Repeated cancels are no-ops.
    pub async fn cancel(&self, thread_id: &str) -> Result<()> {
        let mut thread = self.get_thread(thread_id).await?;
        self.cancellation(thread_id).cancel();
        if thread.state == ThreadState::Cancelled {
            return Ok(());
        }
        thread.pending_interrupt = None;
        self.transition(&mut thread, ThreadState::Cancelled).await
    }

    /// Drive one full message turn against an LLM provider: append the
    /// operator message, loop provider replies through tool execution,
    /// and return either the final text or the interrupt that suspended
    /// the turn.
    pub async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        provider: &dyn LlmProvider,
    ) -> Result<SendOutcome> {
        let _guard = self.acquire(thread_id)?;
        let mut thread = self.get_thread(thread_id).await?;
        if thread.state == ThreadState::Interrupted {
            return Err(OlavError::Busy(format!(
                "thread '{thread_id}' is awaiting approval"
            )));
        }
        if thread.state == ThreadState::Cancelled {
            thread.state = ThreadState::Idle;
            self.reset_cancel(thread_id);
        }
        let cancel = self.cancellation(thread_id);

        thread.push(Message::new(Role::Operator, text));
        self.transition(&mut thread, ThreadState::Running).await?;

        for _ in 0..MAX_TOOL_ROUNDS {
            if cancel.is_cancelled() {
                self.transition(&mut thread, ThreadState::Cancelled).await?;
                return Err(OlavError::Busy(format!("thread '{thread_id}' cancelled")));
            }
            let reply = provider.reply(&thread, &self.tools.specs()).await?;

            if reply.tool_calls.is_empty() {
                let text = reply.text.unwrap_or_default();
                thread.push(Message::new(Role::Assistant, text.clone()));
                self.transition(&mut thread, ThreadState::Idle).await?;
                return Ok(SendOutcome::Replied { text });
            }

            for call in reply.tool_calls {
                let outcome = match self
                    .invoke_tool(&mut thread, &call.tool, call.arguments, None)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.transition(&mut thread, ThreadState::Idle).await?;
                        return Err(e);
                    }
                };
                if let ToolOutcome::Interrupted(interrupt) = outcome {
                    return Ok(SendOutcome::Interrupted(interrupt));
                }
            }
        }

        self.transition(&mut thread, ThreadState::Idle).await?;
        Err(OlavError::internal(format!(
            "provider exceeded {MAX_TOOL_ROUNDS} tool rounds in one turn"
        )))
    }

    /// Shared tool invocation path. On success the output is appended as
    /// a tool message; a `NeedsApproval` signal records the interrupt and
    /// flips the thread to `Interrupted`.
    async fn invoke_tool(
        &self,
        thread: &mut Thread,
        tool_name: &str,
        arguments: serde_json::Value,
        approval: Option<String>,
    ) -> Result<ToolOutcome> {
        let tool = self
            .tools
            .find(tool_name)
            .ok_or_else(|| OlavError::not_found(format!("tool '{tool_name}'")))?;

        self.transition(thread, ThreadState::ToolExec).await?;

        let mut ctx = ToolContext::agent(thread.thread_id.clone())
            .with_cancel(self.cancellation(&thread.thread_id));
        ctx.approval = approval;

        match tool.call(arguments.clone(), &ctx).await {
            Ok(output) => {
                thread.push(Message::new(Role::Tool, output.clone()));
                self.transition(thread, ThreadState::Running).await?;
                Ok(ToolOutcome::Completed { output })
            }
            Err(err) => {
                let fingerprint = err.approval_fingerprint().map(str::to_string);
                match fingerprint {
                    Some(fingerprint) => {
                        if thread.executed_fingerprints.contains(&fingerprint) {
                            // Client retry of a call that already ran.
                            self.transition(thread, ThreadState::Running).await?;
                            return Ok(ToolOutcome::AlreadyApplied);
                        }
                        let interrupt = Interrupt {
                            tool_name: tool_name.to_string(),
                            arguments,
                            fingerprint,
                            requested_at: OffsetDateTime::now_utc(),
                        };
                        thread.pending_interrupt = Some(interrupt.clone());
                        self.transition(thread, ThreadState::Interrupted).await?;
                        Ok(ToolOutcome::Interrupted(interrupt))
                    }
                    None => {
                        thread.push(Message::new(
                            Role::System,
                            format!("tool '{tool_name}' failed: {err}"),
                        ));
                        self.transition(thread, ThreadState::Running).await?;
                        Err(match err {
                            crate::tools::ToolError::Core(core) => core,
                            other => OlavError::ParseFailed {
                                operation: format!("tool '{tool_name}' arguments"),
                                reason: other.to_string(),
                            },
                        })
                    }
                }
            }
        }
    }

    /// Persist a state transition before acknowledging it.
    async fn transition(&self, thread: &mut Thread, state: ThreadState) -> Result<()> {
        thread.state = state;
        thread.updated_at = OffsetDateTime::now_utc();
        self.store.save(thread).await
    }

    /// Per-thread serialization; an occupied lock means `Busy`.
    fn acquire(&self, thread_id: &str) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = Arc::clone(
            self.locks
                .lock()
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        lock.try_lock_owned()
            .map_err(|_| OlavError::Busy(thread_id.to_string()))
    }

    fn reset_cancel(&self, thread_id: &str) {
        self.cancels
            .lock()
            .insert(thread_id.to_string(), CancellationToken::new());
    }
}
