use std::{fmt, time::Duration};

/// What the broadcaster does when a subscriber's buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the subscriber; its stream ends with `EndReason::Evicted`.
    /// The producer never waits on a consumer.
    #[default]
    Disconnect,
    /// Wait for buffer space. One stalled subscriber stalls output capture for
    /// the whole job until it drains or drops its receiver.
    Block,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Disconnect => f.write_str("disconnect"),
            OverflowPolicy::Block => f.write_str("block"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BroadcastConfig {
    /// Chunks buffered per subscriber before the overflow policy applies.
    pub subscriber_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 64,
            overflow: OverflowPolicy::Disconnect,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SupervisorConfig {
    pub broadcast: BroadcastConfig,
    /// How long the completion watcher waits for the output pipes to reach EOF
    /// after the process exits. A backgrounded grandchild can hold them open.
    pub drain_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            broadcast: BroadcastConfig::default(),
            drain_grace: Duration::from_secs(2),
        }
    }
}
