//! Diff merge engine.
//!
//! Merges the ordered change streams of several revision windows into one
//! feature-id-ordered, net-effect stream. Windows are given oldest first;
//! for each feature its per-window records are folded into a single net
//! change, and features whose history cancels out are dropped entirely.
//!
//! Streams are consumed in lock-step with at most one buffered record per
//! input, and every input is closed exactly once: on its own exhaustion,
//! or when the merged stream itself is closed early.

use crate::error::Result;
use crate::models::{FeatureChange, FeatureId};
use crate::store::ChangeStream;

struct Slot<S> {
    stream: S,
    pending: Option<FeatureChange>,
    open: bool,
}

/// K-way merge over per-window change streams
pub struct MergedChangeStream<S> {
    slots: Vec<Slot<S>>,
}

impl<S: ChangeStream> MergedChangeStream<S> {
    /// Build a merge over streams covering disjoint windows in ascending
    /// window order
    pub fn new(streams: Vec<S>) -> Self {
        Self {
            slots: streams
                .into_iter()
                .map(|stream| Slot {
                    stream,
                    pending: None,
                    open: true,
                })
                .collect(),
        }
    }

    /// Pull one record into every open slot that has none buffered,
    /// closing streams as they run dry
    fn refill(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            if slot.open && slot.pending.is_none() {
                match slot.stream.next_change()? {
                    Some(change) => slot.pending = Some(change),
                    None => {
                        slot.stream.close();
                        slot.open = false;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<S: ChangeStream> ChangeStream for MergedChangeStream<S> {
    fn next_change(&mut self) -> Result<Option<FeatureChange>> {
        loop {
            self.refill()?;

            let Some(smallest) = self
                .slots
                .iter()
                .filter_map(|slot| slot.pending.as_ref().map(FeatureChange::id))
                .min()
                .cloned()
            else {
                return Ok(None);
            };

            // take this feature's record from every window, oldest first
            let records: Vec<FeatureChange> = self
                .slots
                .iter_mut()
                .filter(|slot| {
                    slot.pending
                        .as_ref()
                        .is_some_and(|change| *change.id() == smallest)
                })
                .filter_map(|slot| slot.pending.take())
                .collect();

            if let Some(net) = fold(&smallest, records) {
                return Ok(Some(net));
            }
            // the feature's history cancelled out; move on
        }
    }

    fn close(&mut self) {
        for slot in &mut self.slots {
            if slot.open {
                slot.stream.close();
                slot.open = false;
            }
            slot.pending = None;
        }
    }
}

/// Reduce one feature's window-ordered records to its net change.
///
/// Tracks a rolling `(from, to)` pair: an insert that follows a removal
/// restarts the net as a fresh insert, a delete clears the after-state,
/// and an update that follows a removal restarts the base from its own
/// before-state (the intervening re-creation happened in a skipped
/// checkpoint revision).
fn fold(id: &FeatureId, records: Vec<FeatureChange>) -> Option<FeatureChange> {
    let mut records = records.into_iter();
    let first = records.next()?;
    let mut from = first.before().cloned();
    let mut to = first.after().cloned();

    for record in records {
        match record {
            FeatureChange::Inserted { feature, .. } => {
                if to.is_none() {
                    from = None;
                }
                to = Some(feature);
            }
            FeatureChange::Updated { before, after, .. } => {
                if to.is_none() {
                    from = Some(before);
                }
                to = Some(after);
            }
            FeatureChange::Deleted { .. } => {
                to = None;
            }
        }
    }

    FeatureChange::from_endpoints(id.clone(), from, to)
}
