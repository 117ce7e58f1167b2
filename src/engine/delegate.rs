//! Peer engines exposed to the model as tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::ConversationEngine;
use crate::error::KestrelError;
use crate::tools::{Capability, ToolArguments, ToolDescriptor, ToolParameters};

/// Forwards the model's `msg` argument to a peer engine's `send`.
pub struct DelegateCapability {
    descriptor: ToolDescriptor,
    peer: Arc<ConversationEngine>,
}

impl DelegateCapability {
    /// Wrap `peer` as tool `delegate_{index}_send_message`.
    ///
    /// The peer must carry a delegation description.
    pub fn new(index: usize, peer: Arc<ConversationEngine>) -> Result<Self, KestrelError> {
        let description = peer.delegation_description().ok_or_else(|| {
            KestrelError::Configuration(format!(
                "delegate '{}' has no delegation description",
                peer.name()
            ))
        })?;
        let descriptor = ToolDescriptor::new(format!("delegate_{index}_send_message"), description)
            .with_parameters(
                ToolParameters::object()
                    .string("msg", "Natural language command for the coworker agent", true)
                    .build(),
            );
        Ok(Self { descriptor, peer })
    }

    pub fn peer(&self) -> &Arc<ConversationEngine> {
        &self.peer
    }
}

#[async_trait]
impl Capability for DelegateCapability {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: &ToolArguments) -> Result<Value, KestrelError> {
        let msg = args.get_str("msg")?;
        tracing::debug!(delegate = %self.peer.name(), "Delegating to peer engine");
        let result = self
            .peer
            .send(msg, None)
            .await
            .map_err(|e| KestrelError::ToolExecution {
                tool_name: self.descriptor.name.clone(),
                message: format!("peer '{}' failed: {e}", self.peer.name()),
            })?;
        Ok(json!(result.text))
    }
}
