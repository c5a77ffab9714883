//! Immutable-snapshot shared state with structural patches and loop-safe
//! synchronization.
//!
//! The container holds one `Arc<T>` snapshot at a time. Mutations go through
//! [`SharedState::mutate`] (clone-on-write against the current snapshot) or
//! [`SharedState::patch`] (path-based operations applied atomically through
//! the serde value tree). Observers holding a previous snapshot are never
//! affected; change detection is a pointer comparison away.
//!
//! # Sync ids
//!
//! Every mutation is tagged with a sync id (caller-supplied or generated).
//! The container remembers recently applied ids and silently ignores a
//! mutation it has already applied. Two containers mirroring each other's
//! `updated` events therefore converge in one round trip: the echo of a
//! forwarded mutation arrives with an id the originator has already seen.
//!
//! # Deadlock Prevention
//!
//! Subscriber callbacks run after the internal lock is released, so a
//! callback may re-enter `mutate`/`patch` (the mirroring wiring does exactly
//! that) without deadlocking.

// Rust guideline compliant 2026-03

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;

/// How many applied sync ids are remembered per state instance.
///
/// Ids are evicted oldest-first; ids are single-use UUIDs, so an evicted id
/// reappearing is not expected in practice.
const SEEN_SYNC_CAP: usize = 4096;

/// Operation kind of one structural patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert a value at a path that did not exist.
    Add,
    /// Replace the value at a path.
    Replace,
    /// Remove the value at a path.
    Remove,
}

/// One path-based state operation.
///
/// An empty path addresses the root value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    /// Operation kind.
    pub op: PatchOp,
    /// Object keys and array indices from the root to the target.
    pub path: Vec<String>,
    /// New value for `add`/`replace`; absent for `remove`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl StatePatch {
    /// A whole-state replacement.
    pub fn root(value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: Vec::new(),
            value: Some(value),
        }
    }
}

/// Handle for removing an `updated` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Callback fired after every applied mutation.
pub type UpdateCallback<T> = Arc<dyn Fn(&Arc<T>, Option<&[StatePatch]>, &str) + Send + Sync>;

struct StateInner<T> {
    snapshot: Arc<T>,
    enable_patches: bool,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    subscribers: Vec<(u64, UpdateCallback<T>)>,
    next_sub: u64,
}

impl<T> StateInner<T> {
    fn already_seen(&self, sync_id: &str) -> bool {
        self.seen.contains(sync_id)
    }

    fn remember(&mut self, sync_id: String) {
        if self.seen.insert(sync_id.clone()) {
            self.seen_order.push_back(sync_id);
            while self.seen_order.len() > SEEN_SYNC_CAP {
                if let Some(evicted) = self.seen_order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }
}

/// Shared state holding one immutable snapshot at a time.
///
/// Cheap to clone; all clones observe and mutate the same state.
pub struct SharedState<T> {
    inner: Arc<Mutex<StateInner<T>>>,
}

impl<T> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState").finish_non_exhaustive()
    }
}

impl<T> SharedState<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a state without patch computation.
    pub fn new(initial: T) -> Self {
        Self::build(initial, false)
    }

    /// Create a state that computes and emits patches on every mutation.
    pub fn with_patches(initial: T) -> Self {
        Self::build(initial, true)
    }

    fn build(initial: T, enable_patches: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                snapshot: Arc::new(initial),
                enable_patches,
                seen: HashSet::new(),
                seen_order: VecDeque::new(),
                subscribers: Vec::new(),
                next_sub: 1,
            })),
        }
    }

    /// The current snapshot.
    pub fn value(&self) -> Arc<T> {
        self.inner.lock().expect("state poisoned").snapshot.clone()
    }

    /// Subscribe to `updated` notifications.
    pub fn on_updated(
        &self,
        callback: impl Fn(&Arc<T>, Option<&[StatePatch]>, &str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("state poisoned");
        let id = inner.next_sub;
        inner.next_sub += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("state poisoned");
        inner.subscribers.retain(|(sub, _)| *sub != id.0);
    }

    /// Record a sync id as applied without mutating.
    ///
    /// Used when handing out a snapshot whose application elsewhere will be
    /// forwarded back with this id.
    pub fn mark_seen(&self, sync_id: &str) {
        self.inner
            .lock()
            .expect("state poisoned")
            .remember(sync_id.to_string());
    }

    /// Apply a clone-on-write mutation.
    ///
    /// Returns `false` (a silent no-op) when the sync id was already applied.
    pub fn mutate(&self, f: impl FnOnce(&mut T), sync_id: Option<&str>) -> bool {
        let sid = sync_id.map_or_else(generate_sync_id, str::to_string);

        let (snapshot, patches, subscribers) = {
            let mut inner = self.inner.lock().expect("state poisoned");
            if inner.already_seen(&sid) {
                return false;
            }

            let prev = inner.snapshot.clone();
            let mut next: T = (*prev).clone();
            f(&mut next);

            let patches = if inner.enable_patches {
                match (serde_json::to_value(&*prev), serde_json::to_value(&next)) {
                    (Ok(before), Ok(after)) => Some(diff_values(&before, &after)),
                    _ => {
                        log::warn!("[State] failed to serialize snapshot for patch computation");
                        None
                    }
                }
            } else {
                None
            };

            inner.snapshot = Arc::new(next);
            inner.remember(sid.clone());
            (
                inner.snapshot.clone(),
                patches,
                inner.subscribers.clone(),
            )
        };

        for (_, callback) in subscribers {
            callback(&snapshot, patches.as_deref(), &sid);
        }
        true
    }

    /// Replace the whole state.
    ///
    /// Returns `false` when the sync id was already applied.
    pub fn replace(&self, value: T, sync_id: Option<&str>) -> bool {
        let mut value = Some(value);
        self.mutate(
            |state| {
                if let Some(value) = value.take() {
                    *state = value;
                }
            },
            sync_id,
        )
    }

    /// Apply a list of structural patches atomically.
    ///
    /// Returns `Ok(false)` (a silent no-op) when the sync id was already
    /// applied.
    ///
    /// # Errors
    ///
    /// `StateError::BadPath` when a patch path does not resolve;
    /// `StateError::Shape` when the patched tree no longer matches `T`. The
    /// state is unchanged on error.
    pub fn patch(&self, patches: &[StatePatch], sync_id: Option<&str>) -> Result<bool, StateError> {
        let sid = sync_id.map_or_else(generate_sync_id, str::to_string);

        let (snapshot, subscribers) = {
            let mut inner = self.inner.lock().expect("state poisoned");
            if inner.already_seen(&sid) {
                return Ok(false);
            }

            let mut tree = serde_json::to_value(&*inner.snapshot)
                .map_err(|e| StateError::Shape(e.to_string()))?;
            for patch in patches {
                apply_patch(&mut tree, patch)?;
            }
            let next: T =
                serde_json::from_value(tree).map_err(|e| StateError::Shape(e.to_string()))?;

            inner.snapshot = Arc::new(next);
            inner.remember(sid.clone());
            (inner.snapshot.clone(), inner.subscribers.clone())
        };

        for (_, callback) in subscribers {
            callback(&snapshot, Some(patches), &sid);
        }
        Ok(true)
    }
}

fn generate_sync_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Compute path-based patches turning `old` into `new`.
pub fn diff_values(old: &Value, new: &Value) -> Vec<StatePatch> {
    let mut patches = Vec::new();
    diff_at(old, new, &mut Vec::new(), &mut patches);
    patches
}

fn diff_at(old: &Value, new: &Value, path: &mut Vec<String>, out: &mut Vec<StatePatch>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    let mut path = path.clone();
                    path.push(key.clone());
                    out.push(StatePatch {
                        op: PatchOp::Remove,
                        path,
                        value: None,
                    });
                }
            }
            for (key, new_value) in new_map {
                path.push(key.clone());
                match old_map.get(key) {
                    Some(old_value) => diff_at(old_value, new_value, path, out),
                    None => out.push(StatePatch {
                        op: PatchOp::Add,
                        path: path.clone(),
                        value: Some(new_value.clone()),
                    }),
                }
                path.pop();
            }
        }
        // Same-length arrays patch element-wise; a length change replaces
        // the whole array (no splice semantics)
        (Value::Array(old_items), Value::Array(new_items))
            if old_items.len() == new_items.len() =>
        {
            for (i, (old_item, new_item)) in old_items.iter().zip(new_items).enumerate() {
                path.push(i.to_string());
                diff_at(old_item, new_item, path, out);
                path.pop();
            }
        }
        _ => out.push(StatePatch {
            op: PatchOp::Replace,
            path: path.clone(),
            value: Some(new.clone()),
        }),
    }
}

/// Apply one patch to a value tree.
pub fn apply_patch(tree: &mut Value, patch: &StatePatch) -> Result<(), StateError> {
    let render = || patch.path.join("/");

    if patch.path.is_empty() {
        match patch.op {
            PatchOp::Add | PatchOp::Replace => {
                *tree = patch
                    .value
                    .clone()
                    .ok_or_else(|| StateError::BadPath(render()))?;
            }
            PatchOp::Remove => *tree = Value::Null,
        }
        return Ok(());
    }

    let (last, parents) = patch.path.split_last().expect("path checked non-empty");
    let mut target = tree;
    for seg in parents {
        target = descend(target, seg).ok_or_else(|| StateError::BadPath(render()))?;
    }

    match target {
        Value::Object(map) => match patch.op {
            PatchOp::Add | PatchOp::Replace => {
                let value = patch
                    .value
                    .clone()
                    .ok_or_else(|| StateError::BadPath(render()))?;
                map.insert(last.clone(), value);
            }
            PatchOp::Remove => {
                // Removing an already-absent key is idempotent
                map.remove(last);
            }
        },
        Value::Array(items) => {
            let index: usize = last.parse().map_err(|_| StateError::BadPath(render()))?;
            match patch.op {
                PatchOp::Replace => {
                    let value = patch
                        .value
                        .clone()
                        .ok_or_else(|| StateError::BadPath(render()))?;
                    *items.get_mut(index).ok_or_else(|| StateError::BadPath(render()))? = value;
                }
                PatchOp::Add => {
                    let value = patch
                        .value
                        .clone()
                        .ok_or_else(|| StateError::BadPath(render()))?;
                    if index > items.len() {
                        return Err(StateError::BadPath(render()));
                    }
                    items.insert(index, value);
                }
                PatchOp::Remove => {
                    if index < items.len() {
                        items.remove(index);
                    }
                }
            }
        }
        _ => return Err(StateError::BadPath(render())),
    }
    Ok(())
}

fn descend<'a>(value: &'a mut Value, seg: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(seg),
        Value::Array(items) => {
            let index: usize = seg.parse().ok()?;
            items.get_mut(index)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PanelState {
        selected: String,
        counters: Vec<u32>,
    }

    fn initial() -> PanelState {
        PanelState {
            selected: "assets".into(),
            counters: vec![0, 0],
        }
    }

    #[test]
    fn test_mutate_produces_new_snapshot_and_keeps_old_ones() {
        let state = SharedState::new(initial());
        let before = state.value();

        assert!(state.mutate(|s| s.counters[0] = 7, None));

        let after = state.value();
        assert_eq!(after.counters[0], 7);
        // Snapshot held before the mutation is untouched
        assert_eq!(before.counters[0], 0);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_repeated_sync_id_is_a_silent_no_op() {
        let state = SharedState::new(initial());
        assert!(state.mutate(|s| s.selected = "after-f".into(), Some("sync-1")));
        assert!(!state.mutate(|s| s.selected = "after-g".into(), Some("sync-1")));
        assert_eq!(state.value().selected, "after-f");
    }

    #[test]
    fn test_updated_fires_with_patches_when_enabled() {
        let state = SharedState::with_patches(initial());
        let captured: Arc<Mutex<Vec<(Option<Vec<StatePatch>>, String)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let captured2 = captured.clone();
        state.on_updated(move |_, patches, sid| {
            captured2
                .lock()
                .unwrap()
                .push((patches.map(<[StatePatch]>::to_vec), sid.to_string()));
        });

        state.mutate(|s| s.counters[1] = 5, Some("sync-a"));

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let (patches, sid) = &captured[0];
        assert_eq!(sid, "sync-a");
        let patches = patches.as_ref().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].path, vec!["counters", "1"]);
        assert_eq!(patches[0].value, Some(json!(5)));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let state = SharedState::new(initial());
        let count = Arc::new(Mutex::new(0usize));
        let count2 = count.clone();
        let sub = state.on_updated(move |_, _, _| *count2.lock().unwrap() += 1);

        state.mutate(|s| s.counters[0] += 1, None);
        state.unsubscribe(sub);
        state.mutate(|s| s.counters[0] += 1, None);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_patch_round_trip() {
        let state = SharedState::with_patches(initial());
        state
            .patch(
                &[StatePatch {
                    op: PatchOp::Replace,
                    path: vec!["selected".into()],
                    value: Some(json!("network")),
                }],
                Some("sync-p"),
            )
            .unwrap();
        assert_eq!(state.value().selected, "network");

        // Repeating the sync id is a no-op
        let applied = state
            .patch(&[StatePatch::root(json!({"selected": "x", "counters": []}))], Some("sync-p"))
            .unwrap();
        assert!(!applied);
        assert_eq!(state.value().selected, "network");
    }

    #[test]
    fn test_patch_bad_path_leaves_state_unchanged() {
        let state = SharedState::new(initial());
        let err = state
            .patch(
                &[StatePatch {
                    op: PatchOp::Replace,
                    path: vec!["missing".into(), "deep".into()],
                    value: Some(json!(1)),
                }],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StateError::BadPath(_)));
        assert_eq!(*state.value(), initial());
    }

    #[test]
    fn test_mirrored_states_converge_without_ping_pong() {
        let a = SharedState::with_patches(serde_json::Map::new());
        let b = SharedState::with_patches(serde_json::Map::new());

        let a_updates = Arc::new(Mutex::new(0usize));
        let b_updates = Arc::new(Mutex::new(0usize));

        // Mirror a -> b
        {
            let b = b.clone();
            let a_updates = a_updates.clone();
            a.on_updated(move |_, patches, sid| {
                *a_updates.lock().unwrap() += 1;
                b.patch(patches.expect("patches enabled"), Some(sid)).unwrap();
            });
        }
        // Mirror b -> a
        {
            let a = a.clone();
            let b_updates = b_updates.clone();
            b.on_updated(move |_, patches, sid| {
                *b_updates.lock().unwrap() += 1;
                a.patch(patches.expect("patches enabled"), Some(sid)).unwrap();
            });
        }

        // Two rounds of alternating mutation
        a.mutate(|s| {
            s.insert("round".into(), json!(1));
        }, Some("sync-1"));
        b.mutate(|s| {
            s.insert("round".into(), json!(2));
        }, Some("sync-2"));

        assert_eq!(a.value()["round"], json!(2));
        assert_eq!(b.value()["round"], json!(2));
        // Exactly one update per original mutation on each side
        assert_eq!(*a_updates.lock().unwrap(), 2);
        assert_eq!(*b_updates.lock().unwrap(), 2);
    }

    #[test]
    fn test_diff_array_length_change_replaces_whole_array() {
        let old = json!({"items": [1, 2]});
        let new = json!({"items": [1, 2, 3]});
        let patches = diff_values(&old, &new);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].op, PatchOp::Replace);
        assert_eq!(patches[0].path, vec!["items"]);
        assert_eq!(patches[0].value, Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_diff_and_apply_agree() {
        let old = json!({"a": {"b": 1}, "gone": true, "list": [1, 2]});
        let new = json!({"a": {"b": 2}, "fresh": "x", "list": [1, 9]});

        let patches = diff_values(&old, &new);
        let mut tree = old.clone();
        for patch in &patches {
            apply_patch(&mut tree, patch).unwrap();
        }
        assert_eq!(tree, new);
    }
}
