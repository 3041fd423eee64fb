//! Live mix layout (spec §4.6 "Live layout update"): the mutex-protected
//! `id → MixStream` map and its transactional update diff.
//!
//! Isolated from ffmpeg so the transactional semantics — add/remove/update
//! exactly the ids that changed, everything else untouched — are plain unit
//! tests (spec §8 "`update` of a mix with an identical stream set is a
//! no-op").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One composited input's placement (spec §3 `MixStream`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MixStream {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    pub z_index: i32,
}

impl MixStream {
    fn placement_eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.x == other.x
            && self.y == other.y
            && self.z_index == other.z_index
    }
}

/// One observable effect of an [`MixState::update`] call (spec §4.6: "Log
/// lines describing each add / remove / update are required side
/// effects").
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Change {
    Added(MixStream),
    Removed(String),
    Updated(MixStream),
}

/// Currently-composited inputs, keyed by id. Insertion order is preserved
/// (a `BTreeMap` keyed by a monotonically-assigned sequence alongside the
/// id would work too, but spec's tie-break is "insertion order", so we keep
/// an explicit order vector).
#[derive(Clone, Debug, Default)]
pub struct MixState {
    order: Vec<String>,
    streams: BTreeMap<String, MixStream>,
}

impl MixState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&MixStream> {
        self.streams.get(id)
    }

    /// Streams in composite order: ascending `z_index`, ties broken by
    /// insertion order (spec §4.6 "Composite semantics").
    pub fn ordered(&self) -> Vec<&MixStream> {
        let mut items: Vec<&MixStream> = self
            .order
            .iter()
            .filter_map(|id| self.streams.get(id))
            .collect();
        items.sort_by_key(|s| s.z_index);
        // `sort_by_key` is stable, so ties keep `self.order`'s relative
        // order, i.e. insertion order.
        items
    }

    /// Atomically replaces the stream set with `new`, returning exactly the
    /// adds/removes/updates that actually changed something (spec §4.6).
    pub fn update(&mut self, new: Vec<MixStream>) -> Vec<Change> {
        let mut changes = Vec::new();
        let new_ids: std::collections::HashSet<&str> =
            new.iter().map(|s| s.id.as_str()).collect();

        let removed_ids: Vec<String> = self
            .order
            .iter()
            .filter(|id| !new_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &removed_ids {
            self.streams.remove(id);
            changes.push(Change::Removed(id.clone()));
        }
        self.order.retain(|id| !removed_ids.contains(id));

        for s in new {
            match self.streams.get(&s.id) {
                None => {
                    self.order.push(s.id.clone());
                    changes.push(Change::Added(s.clone()));
                    self.streams.insert(s.id.clone(), s);
                }
                Some(existing) => {
                    if !existing.placement_eq(&s) {
                        changes.push(Change::Updated(s.clone()));
                        self.streams.insert(s.id.clone(), s);
                    }
                }
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, z: i32) -> MixStream {
        MixStream {
            id: id.to_owned(),
            url: format!("rtmp://example/{id}"),
            width: 320,
            height: 180,
            x: 0,
            y: 0,
            z_index: z,
        }
    }

    #[test]
    fn first_update_adds_everything() {
        let mut state = MixState::new();
        let changes = state.update(vec![stream("a", 0), stream("b", 1)]);
        assert_eq!(
            changes,
            vec![Change::Added(stream("a", 0)), Change::Added(stream("b", 1))]
        );
    }

    #[test]
    fn identical_set_is_a_no_op() {
        let mut state = MixState::new();
        state.update(vec![stream("a", 0), stream("b", 1)]);
        let changes = state.update(vec![stream("a", 0), stream("b", 1)]);
        assert!(changes.is_empty());
    }

    #[test]
    fn swap_b_c_removes_a_adds_c_leaves_b_untouched() {
        let mut state = MixState::new();
        state.update(vec![stream("a", 0), stream("b", 1)]);
        let changes = state.update(vec![stream("b", 1), stream("c", 2)]);
        assert_eq!(
            changes,
            vec![Change::Removed("a".to_owned()), Change::Added(stream("c", 2))]
        );
        assert_eq!(
            state.ordered().iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn placement_change_is_an_update_not_add_remove() {
        let mut state = MixState::new();
        state.update(vec![stream("a", 0)]);
        let mut moved = stream("a", 0);
        moved.x = 50;
        let changes = state.update(vec![moved.clone()]);
        assert_eq!(changes, vec![Change::Updated(moved)]);
    }

    #[test]
    fn ordered_breaks_z_index_ties_by_insertion_order() {
        let mut state = MixState::new();
        state.update(vec![stream("a", 0), stream("b", 0), stream("c", 0)]);
        assert_eq!(
            state.ordered().iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn ordered_sorts_by_z_index_ascending() {
        let mut state = MixState::new();
        state.update(vec![stream("a", 5), stream("b", 1), stream("c", 3)]);
        assert_eq!(
            state.ordered().iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );
    }
}
