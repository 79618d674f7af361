use crate::domain::OperatorLink;
use anyhow::Context;
use async_trait::async_trait;
use smpp::{SessionHandle, ShortMessage};

/// [`OperatorLink`] over a bound SMPP transceiver session
#[derive(Clone)]
pub struct SessionLink {
    handle: SessionHandle,
}

impl SessionLink {
    pub fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl OperatorLink for SessionLink {
    async fn submit(&self, sequence_number: i32, part: ShortMessage) -> anyhow::Result<()> {
        let sequence_number = u32::try_from(sequence_number)
            .with_context(|| format!("sequence number {sequence_number} is negative"))?;
        self.handle
            .submit(sequence_number, part)
            .await
            .context("failed to submit to operator")
    }
}
