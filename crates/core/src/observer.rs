//! Hooks into the dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tool_loop_model::{ModelFinishReason, ModelProviderError, ToolCallRequest};

use crate::tool::{ResolvedCall, ToolResult};

/// Receives notifications at fixed points of a run.
///
/// All methods have empty default implementations, so an observer only
/// overrides what it cares about. Observers are called inline and should
/// return quickly.
pub trait DispatchObserver: Send + Sync {
    /// A new iteration is about to submit the conversation.
    fn on_iteration_start(&self, _iteration: usize) {}

    /// A submission failed and is tried again after `delay`.
    ///
    /// Text streamed to the transcript callback by the failed attempt is
    /// streamed again from the start by the next one.
    fn on_model_retry(
        &self,
        _iteration: usize,
        _error: &dyn ModelProviderError,
        _delay: Duration,
    ) {
    }

    /// The model answered in the given iteration.
    fn on_model_response(
        &self,
        _iteration: usize,
        _text: &str,
        _tool_calls: &[ToolCallRequest],
        _finish_reason: Option<ModelFinishReason>,
    ) {
    }

    /// A validated tool call is about to run.
    fn on_tool_start(&self, _call: &ResolvedCall) {}

    /// A tool call finished, successfully or not.
    fn on_tool_finish(
        &self,
        _call: &ResolvedCall,
        _result: &ToolResult,
        _elapsed: Duration,
    ) {
    }
}

impl<T: DispatchObserver + ?Sized> DispatchObserver for Arc<T> {
    fn on_iteration_start(&self, iteration: usize) {
        (**self).on_iteration_start(iteration)
    }

    fn on_model_retry(
        &self,
        iteration: usize,
        error: &dyn ModelProviderError,
        delay: Duration,
    ) {
        (**self).on_model_retry(iteration, error, delay)
    }

    fn on_model_response(
        &self,
        iteration: usize,
        text: &str,
        tool_calls: &[ToolCallRequest],
        finish_reason: Option<ModelFinishReason>,
    ) {
        (**self).on_model_response(iteration, text, tool_calls, finish_reason)
    }

    fn on_tool_start(&self, call: &ResolvedCall) {
        (**self).on_tool_start(call)
    }

    fn on_tool_finish(
        &self,
        call: &ResolvedCall,
        result: &ToolResult,
        elapsed: Duration,
    ) {
        (**self).on_tool_finish(call, result, elapsed)
    }
}

/// The default observer, which emits `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_iteration_start(&self, iteration: usize) {
        debug!(iteration, "submitting conversation");
    }

    fn on_model_response(
        &self,
        iteration: usize,
        text: &str,
        tool_calls: &[ToolCallRequest],
        finish_reason: Option<ModelFinishReason>,
    ) {
        let tools: Vec<_> = tool_calls.iter().map(|t| t.name.as_str()).collect();
        debug!(iteration, text_len = text.len(), ?tools, ?finish_reason, "model responded");
        if finish_reason == Some(ModelFinishReason::Length) {
            warn!(iteration, "model output was cut off at the token limit");
        }
    }

    fn on_tool_start(&self, call: &ResolvedCall) {
        info!(tool = call.name(), id = call.id(), "calling tool");
        trace!("tool arguments: {:?}", call.arguments());
    }

    fn on_tool_finish(
        &self,
        call: &ResolvedCall,
        result: &ToolResult,
        elapsed: Duration,
    ) {
        match result {
            Ok(_) => {
                info!(tool = call.name(), ?elapsed, "tool finished");
            }
            Err(err) => {
                warn!(tool = call.name(), ?elapsed, "tool failed: {err}");
            }
        }
    }
}
