//! Pointer Targets
//!
//! Which window owns the event stream of each active pointer.

use std::collections::BTreeMap;

use crate::ws::window::WindowKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerTarget {
    /// `None` once the window was destroyed mid-gesture
    pub window: Option<WindowKey>,
    pub is_mouse_event: bool,
    pub in_nonclient_area: bool,
    pub is_pointer_down: bool,
}

/// Pointer id -> target, iterated in pointer id order
#[derive(Debug, Default)]
pub struct PointerTargetTable {
    targets: BTreeMap<i32, PointerTarget>,
}

impl PointerTargetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pointer_id: i32) -> Option<&PointerTarget> {
        self.targets.get(&pointer_id)
    }

    pub fn get_mut(&mut self, pointer_id: i32) -> Option<&mut PointerTarget> {
        self.targets.get_mut(&pointer_id)
    }

    pub fn is_tracking(&self, pointer_id: i32) -> bool {
        self.targets.contains_key(&pointer_id)
    }

    pub fn start_tracking(&mut self, pointer_id: i32, target: PointerTarget) {
        self.targets.insert(pointer_id, target);
    }

    pub fn stop_tracking(&mut self, pointer_id: i32) -> Option<PointerTarget> {
        self.targets.remove(&pointer_id)
    }

    pub fn any_pointers_down(&self) -> bool {
        self.targets.values().any(|target| target.is_pointer_down)
    }

    /// Null out every reference to `window`. Returns true if any entry changed.
    pub fn forget_window(&mut self, window: WindowKey) -> bool {
        let mut changed = false;
        for target in self.targets.values_mut() {
            if target.window == Some(window) {
                target.window = None;
                changed = true;
            }
        }
        changed
    }

    /// Remove every entry, returning them in pointer id order
    pub fn take_all(&mut self) -> Vec<(i32, PointerTarget)> {
        std::mem::take(&mut self.targets).into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &PointerTarget)> {
        self.targets.iter().map(|(&id, target)| (id, target))
    }
}
