use serde_json::Value;
use tokio::sync::oneshot;

/// What a submitter waiting on a rendezvous slot eventually observes.
#[derive(Debug, Clone)]
pub enum RendezvousOutcome {
    Delivered(Value),
    TimedOut,
    AgentDeregistered,
}

pub type RendezvousReceiver = oneshot::Receiver<RendezvousOutcome>;
pub type RendezvousSender = oneshot::Sender<RendezvousOutcome>;

/// Creates a fresh single-use slot. The sender half is stored in the
/// dispatcher's pending map under `metaLock`; the receiver half is handed
/// to the submitter to await, lock-free, on the hot path.
pub fn new_slot() -> (RendezvousSender, RendezvousReceiver) {
    oneshot::channel()
}
