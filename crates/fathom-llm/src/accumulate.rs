use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::stream::StreamEvent;
use crate::types::ToolCall;

/// Reassembles streamed tool-call fragments into whole calls.
///
/// The state machine is keyed by the delta `index`, never by `id`: the
/// index is stable across every fragment of a call while the id is
/// late-bound and can arrive on any fragment. Argument fragments are
/// concatenated in arrival order, which within one index is emission order.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the call at `index`.
    pub fn apply(&mut self, index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            if !id.is_empty() {
                call.id = id.to_string();
            }
        }
        if let Some(name) = name {
            if !name.is_empty() {
                debug!(index, name, "tool call named");
                call.name.push_str(name);
            }
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(arguments);
        }
    }

    /// Convenience for stream loops.
    pub fn apply_event(&mut self, event: &StreamEvent) {
        if let StreamEvent::ToolCallDelta {
            index,
            id,
            name,
            arguments,
        } = event
        {
            self.apply(*index, id.as_deref(), name.as_deref(), arguments.as_deref());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finish reassembly: drop calls that never received a name, synthesize
    /// `call_index_{i}` for calls whose id never arrived, default empty
    /// argument strings to `{}`.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut out = Vec::with_capacity(self.calls.len());
        for (index, call) in self.calls {
            if call.name.trim().is_empty() {
                warn!(index, "dropping tool call with empty name");
                continue;
            }
            let id = if call.id.trim().is_empty() {
                format!("call_index_{index}")
            } else {
                call.id
            };
            let arguments = if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            out.push(ToolCall {
                id,
                name: call.name,
                arguments,
            });
        }
        out
    }
}
