use derive_builder::Builder;

/// How the dispatcher keeps a request from running twice across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum ExecutionGuard {
    /// An execution marker is appended to the local log before the executor
    /// runs. A restarted peer answers interrupted requests with a failure
    /// instead of running them again.
    #[default]
    Durable,
    /// Only the in-process guard. Requests cut short by a restart run again.
    Volatile,
}

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct PeerOptions {
    pub execution_guard: ExecutionGuard,
    /// Attach an ed25519 signature to every message this peer writes.
    pub sign_messages: bool,
    /// Skip entries whose signature does not verify against their author.
    pub verify_signatures: bool,
    /// Append the local declaration after recovery when it changed.
    pub announce: bool,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            execution_guard: ExecutionGuard::Durable,
            sign_messages: true,
            verify_signatures: true,
            announce: true,
        }
    }
}

impl PeerOptions {
    pub fn builder() -> PeerOptionsBuilder {
        PeerOptionsBuilder::default()
    }
}
