//! ExecutionContext - per-iteration state handed to the dispatched step.
//!
//! Lifecycle: `rehydrate` (task + message attributes -> context), the step
//! reads and writes headers and may schedule a follow-up, then `dehydrate`
//! or `into_retry` turns the context back into wire state. The context is
//! consumed by both, so it cannot outlive its iteration.

use std::collections::BTreeSet;

use super::headers::{CORRELATION_ID, CarryOver, Headers, LOOP_COUNTER};
use super::ids::CorrelationId;
use super::task::Task;

#[derive(Debug)]
pub struct ExecutionContext {
    current_task: Task,
    loop_counter: u32,
    correlation_id: CorrelationId,
    headers: Headers,

    /// Keys written by the step during this iteration.
    written: BTreeSet<String>,

    follow_up: Option<Task>,
}

/// Wire state left behind by a finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dehydrated {
    /// Follow-up task with the step's headers applied.
    pub follow_up: Option<Task>,

    /// Attributes for the continuation message.
    pub attributes: Headers,
}

impl ExecutionContext {
    /// Build the context for `task`.
    ///
    /// Headers start as the message attributes overlaid with the task's own
    /// headers. The loop counter is lifted out of the header bag into its own
    /// field. The correlation id is read from the headers; `new_correlation`
    /// is only called when none is present.
    pub fn rehydrate(
        task: Task,
        attributes: &Headers,
        new_correlation: impl FnOnce() -> CorrelationId,
    ) -> Self {
        let loop_counter = task.loop_counter();

        let mut headers = attributes.clone();
        headers.extend(task.headers().iter().map(|(k, v)| (k.clone(), v.clone())));
        headers.remove(LOOP_COUNTER);

        let correlation_id = headers
            .get(CORRELATION_ID)
            .map(|v| CorrelationId::new(v.as_str()))
            .unwrap_or_else(new_correlation);
        headers.insert(CORRELATION_ID.to_string(), correlation_id.to_string());

        Self {
            current_task: task,
            loop_counter,
            correlation_id,
            headers,
            written: BTreeSet::new(),
            follow_up: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.current_task
    }

    pub fn loop_counter(&self) -> u32 {
        self.loop_counter
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Not resumed mid-execution and not a retry.
    pub fn is_first_invocation(&self) -> bool {
        !self.current_task.is_started() && self.loop_counter == 0
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set a header. Reserved keys (loop counter, correlation id) are owned by
    /// the engine and writes to them are ignored.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if key == LOOP_COUNTER || key == CORRELATION_ID {
            tracing::warn!(key = %key, "ignoring write to reserved header");
            return;
        }
        self.headers.insert(key.clone(), value.into());
        self.written.insert(key);
    }

    /// Schedule a follow-up task. A later call replaces an earlier one.
    pub fn schedule_follow_up(&mut self, task: Task) {
        self.follow_up = Some(task);
    }

    pub fn follow_up(&self) -> Option<&Task> {
        self.follow_up.as_ref()
    }

    /// Headers written by the step, in key order.
    pub fn written_headers(&self) -> Headers {
        self.written
            .iter()
            .filter_map(|k| self.headers.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    fn carried_attributes(&self, carry: &CarryOver) -> Headers {
        let mut attributes = carry.select(&self.headers);
        attributes.insert(CORRELATION_ID.to_string(), self.correlation_id.to_string());
        attributes
    }

    /// Finish the iteration for a completed step.
    ///
    /// Headers written by the step are copied onto the follow-up, where the
    /// follow-up's own headers take precedence. Carried headers go to the
    /// message attributes whether or not a follow-up exists.
    pub fn dehydrate(self, carry: &CarryOver) -> Dehydrated {
        let attributes = self.carried_attributes(carry);
        let written = self.written_headers();
        let follow_up = self.follow_up.map(|next| {
            let missing: Headers = written
                .into_iter()
                .filter(|(k, _)| next.header(k).is_none())
                .collect();
            next.with_headers(missing).without_header(LOOP_COUNTER)
        });
        Dehydrated {
            follow_up,
            attributes,
        }
    }

    /// Finish the iteration for a rescheduled step.
    ///
    /// Returns the same task (same destination, same sub-step) carrying
    /// `loop_counter` and the step's written headers, plus the message
    /// attributes. A scheduled follow-up is discarded.
    pub fn into_retry(self, loop_counter: u32, carry: &CarryOver) -> (Task, Headers) {
        let attributes = self.carried_attributes(carry);
        if let Some(follow_up) = &self.follow_up {
            tracing::debug!(follow_up = %follow_up, "discarding follow-up of a rescheduled step");
        }
        let written = self.written_headers();
        let task = self
            .current_task
            .with_headers(written)
            .with_header(LOOP_COUNTER, loop_counter.to_string());
        (task, attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fresh() -> CorrelationId {
        CorrelationId::new("generated")
    }

    #[test]
    fn rehydrate_overlays_task_headers_on_attributes() {
        let task = Task::new("INDEX", "es")
            .with_header("source", "task")
            .with_header(LOOP_COUNTER, "2");
        let ctx = ExecutionContext::rehydrate(
            task,
            &attrs(&[("source", "message"), ("geoflow.run", "nightly")]),
            fresh,
        );

        assert_eq!(ctx.header("source"), Some("task"));
        assert_eq!(ctx.header("geoflow.run"), Some("nightly"));
        assert_eq!(ctx.loop_counter(), 2);
        assert!(ctx.header(LOOP_COUNTER).is_none());
        assert!(!ctx.is_first_invocation());
    }

    #[test]
    fn rehydrate_reuses_existing_correlation_id() {
        let ctx = ExecutionContext::rehydrate(
            Task::new("INDEX", "es"),
            &attrs(&[(CORRELATION_ID, "upstream-7")]),
            || panic!("must not generate"),
        );
        assert_eq!(ctx.correlation_id().as_str(), "upstream-7");
        assert!(ctx.is_first_invocation());
    }

    #[test]
    fn rehydrate_generates_correlation_id_when_missing() {
        let ctx = ExecutionContext::rehydrate(Task::new("INDEX", "es"), &Headers::new(), fresh);
        assert_eq!(ctx.correlation_id().as_str(), "generated");
        assert_eq!(ctx.header(CORRELATION_ID), Some("generated"));
    }

    #[test]
    fn written_headers_flow_onto_follow_up() {
        let mut ctx = ExecutionContext::rehydrate(
            Task::new("DOWNLOAD", "a").with_header("entry", "e"),
            &Headers::new(),
            fresh,
        );
        ctx.set_header("X", "1");
        ctx.set_header("keep", "step");
        ctx.schedule_follow_up(Task::new("CONVERT", "b").with_header("keep", "explicit"));

        let out = ctx.dehydrate(&CarryOver::default());
        let next = out.follow_up.unwrap();
        assert_eq!(next.header("X"), Some("1"));
        assert_eq!(next.header("keep"), Some("explicit"));
        // entry headers are not copied, only what the step wrote
        assert!(next.header("entry").is_none());
        assert!(next.header(LOOP_COUNTER).is_none());
    }

    #[test]
    fn carried_headers_propagate_without_follow_up() {
        let mut ctx = ExecutionContext::rehydrate(Task::new("DOWNLOAD", "a"), &Headers::new(), fresh);
        ctx.set_header("geoflow.dataset", "2026-10");
        ctx.set_header("X", "1");

        let out = ctx.dehydrate(&CarryOver::default());
        assert!(out.follow_up.is_none());
        assert_eq!(out.attributes.get("geoflow.dataset").map(String::as_str), Some("2026-10"));
        assert!(!out.attributes.contains_key("X"));
        assert_eq!(out.attributes.get(CORRELATION_ID).map(String::as_str), Some("generated"));
    }

    #[test]
    fn correlation_id_is_carried_even_without_matching_prefix() {
        let ctx = ExecutionContext::rehydrate(Task::new("DOWNLOAD", "a"), &Headers::new(), fresh);
        let out = ctx.dehydrate(&CarryOver::new(["other."]));
        assert!(out.attributes.contains_key(CORRELATION_ID));
    }

    #[test]
    fn reserved_headers_cannot_be_written() {
        let mut ctx = ExecutionContext::rehydrate(Task::new("DOWNLOAD", "a"), &Headers::new(), fresh);
        ctx.set_header(LOOP_COUNTER, "99");
        ctx.set_header(CORRELATION_ID, "hijack");
        assert!(ctx.written_headers().is_empty());
        assert_eq!(ctx.correlation_id().as_str(), "generated");
    }

    #[test]
    fn retry_keeps_task_identity_and_sub_step() {
        let task = Task::new("DEPLOY", "k8s.rollout").with_sub_step(2);
        let mut ctx = ExecutionContext::rehydrate(task.clone(), &Headers::new(), fresh);
        ctx.set_header("replicas", "1/3");
        ctx.schedule_follow_up(Task::new("DEPLOY", "other"));

        let (retry, _) = ctx.into_retry(1, &CarryOver::default());
        assert!(retry.same_unit(&task));
        assert_eq!(retry.sub_step(), 2);
        assert_eq!(retry.loop_counter(), 1);
        assert_eq!(retry.header("replicas"), Some("1/3"));
    }
}
