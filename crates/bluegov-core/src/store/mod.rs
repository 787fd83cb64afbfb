// ── Presence storage ──
//
// Reactive sets of what the last discovery cycle saw. Readers get cheap
// `Arc` snapshots or a `watch` subscription; the discovery engine is the
// only writer.

mod presence;

pub(crate) use presence::{PresenceSet, Reconciled};
