//! Modal Window Controller
//!
//! Tracks system modal windows and redirects events aimed at windows that a
//! modal window blocks. System modal windows (no transient parent) block
//! everything outside themselves; window modal windows only block the
//! subtree of their transient parent.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{WsError, WsResult};
use crate::ws::window::WindowKey;
use crate::ws::window_tree::WindowTree;

/// Modal window controller
#[derive(Debug, Default)]
pub struct ModalWindowController {
    /// Registered system modal windows, most recently shown last
    system_modal_windows: Vec<WindowKey>,
    /// Last observed drawn state of each registered window
    drawn: HashMap<WindowKey, bool>,
}

impl ModalWindowController {
    /// Create a new modal window controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `window` as system modal. The caller marks the window modal in
    /// the tree and releases capture blocked by it.
    pub fn add_system_modal_window(&mut self, tree: &WindowTree, window: WindowKey) -> WsResult<()> {
        let id = tree.id_of(window).ok_or(WsError::WindowNotFound)?;
        if self.system_modal_windows.contains(&window) {
            return Err(WsError::AlreadyModal(id));
        }
        self.system_modal_windows.push(window);
        self.drawn.insert(window, tree.is_drawn(window));
        debug!("Window {} added as system modal", id);
        Ok(())
    }

    pub fn system_modal_windows(&self) -> &[WindowKey] {
        &self.system_modal_windows
    }

    /// Returns true if `modal_window` currently blocks `window`
    pub fn is_window_blocked_by(&self, tree: &WindowTree, window: WindowKey, modal_window: WindowKey) -> bool {
        let Some(modal) = tree.get(modal_window) else {
            return false;
        };
        if !modal.is_modal() || !tree.is_drawn(modal_window) {
            return false;
        }
        if let Some(transient_parent) = modal.transient_parent() {
            if !tree.contains(transient_parent, window) {
                return false;
            }
        }
        true
    }

    /// Returns true if any modal window blocks `window`
    pub fn is_window_blocked(&self, tree: &WindowTree, window: WindowKey) -> bool {
        if let Some(system_modal) = self.active_system_modal_window(tree) {
            if !tree.contains(system_modal, window) {
                return true;
            }
        }
        modal_child_for_window_ancestor(tree, window)
            .is_some_and(|modal| !tree.contains(modal, window))
    }

    /// Window that should receive events aimed at `window`
    pub fn target_for_window(&self, tree: &WindowTree, window: Option<WindowKey>) -> Option<WindowKey> {
        if let Some(system_modal) = self.active_system_modal_window(tree) {
            if window.is_none_or(|window| !tree.contains(system_modal, window)) {
                return Some(system_modal);
            }
        }
        window.map(|window| window_modal_target_for_window(tree, window))
    }

    /// Last registered system modal window that is drawn
    pub fn active_system_modal_window(&self, tree: &WindowTree) -> Option<WindowKey> {
        self.system_modal_windows
            .iter()
            .rev()
            .copied()
            .find(|&window| tree.is_drawn(window))
    }

    /// Move `window` to the end of the list when it becomes drawn
    pub fn on_drawn_state_changed(&mut self, window: WindowKey, is_drawn: bool) {
        self.drawn.insert(window, is_drawn);
        if !is_drawn {
            return;
        }
        if let Some(index) = self.system_modal_windows.iter().position(|&key| key == window) {
            let window = self.system_modal_windows.remove(index);
            self.system_modal_windows.push(window);
        }
    }

    /// Re-read the drawn state of every registered window after a tree change.
    /// Returns the windows that became drawn.
    pub fn update_drawn_states(&mut self, tree: &WindowTree) -> Vec<WindowKey> {
        let changed: Vec<(WindowKey, bool)> = self
            .system_modal_windows
            .iter()
            .map(|&window| (window, tree.is_drawn(window)))
            .filter(|(window, is_drawn)| self.drawn.get(window) != Some(is_drawn))
            .collect();

        let mut newly_drawn = Vec::new();
        for (window, is_drawn) in changed {
            self.on_drawn_state_changed(window, is_drawn);
            if is_drawn {
                newly_drawn.push(window);
            }
        }
        newly_drawn
    }

    pub fn on_window_destroyed(&mut self, window: WindowKey) {
        self.system_modal_windows.retain(|&key| key != window);
        self.drawn.remove(&window);
    }
}

/// Walk up from `window`; at each ancestor look for a drawn modal transient child
fn modal_child_for_window_ancestor(tree: &WindowTree, window: WindowKey) -> Option<WindowKey> {
    let mut ancestor = Some(window);
    while let Some(current) = ancestor {
        let node = tree.get(current)?;
        for &transient_child in node.transient_children() {
            let is_modal = tree.get(transient_child).is_some_and(|child| child.is_modal());
            if is_modal && tree.is_drawn(transient_child) {
                return Some(transient_child);
            }
        }
        ancestor = node.parent();
    }
    None
}

/// Follow window modal children until a window that nothing blocks.
/// A modal child may itself have a modal child.
fn window_modal_target_for_window(tree: &WindowTree, window: WindowKey) -> WindowKey {
    let mut visited = HashSet::new();
    let mut target = window;
    while visited.insert(target) {
        match modal_child_for_window_ancestor(tree, target) {
            Some(modal) if !tree.contains(modal, target) => target = modal,
            _ => break,
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Geometry;
    use crate::ws::ids::{ClientId, WindowId};

    struct Fixture {
        tree: WindowTree,
        root: WindowKey,
        next_id: u32,
    }

    impl Fixture {
        fn new() -> Self {
            let mut tree = WindowTree::new();
            let root = tree
                .create_display_root(WindowId::new(ClientId::SERVER, 1), Geometry::new(0, 0, 1000, 1000))
                .unwrap();
            Self { tree, root, next_id: 1 }
        }

        fn window(&mut self, parent: WindowKey) -> WindowKey {
            self.next_id += 1;
            let key = self
                .tree
                .create_window(WindowId::new(ClientId(1), self.next_id), Geometry::new(0, 0, 100, 100))
                .unwrap();
            self.tree.add_child(parent, key).unwrap();
            self.tree.set_visible(key, true).unwrap();
            key
        }

        fn window_modal(&mut self, transient_parent: WindowKey) -> WindowKey {
            let root = self.root;
            let key = self.window(root);
            self.tree.set_modal(key).unwrap();
            self.tree.set_transient_parent(key, Some(transient_parent)).unwrap();
            key
        }
    }

    #[test]
    fn test_system_modal_redirects_everything_until_destroyed() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let w = fx.window(root);
        let m = fx.window(root);
        fx.tree.set_modal(m).unwrap();
        let mut controller = ModalWindowController::new();
        controller.add_system_modal_window(&fx.tree, m).unwrap();

        assert!(controller.is_window_blocked(&fx.tree, w));
        assert_eq!(controller.target_for_window(&fx.tree, Some(w)), Some(m));
        assert_eq!(controller.target_for_window(&fx.tree, None), Some(m));

        fx.tree.destroy(m).unwrap();
        controller.on_window_destroyed(m);
        assert!(!controller.is_window_blocked(&fx.tree, w));
        assert_eq!(controller.target_for_window(&fx.tree, Some(w)), Some(w));
    }

    #[test]
    fn test_system_modal_does_not_block_its_own_subtree() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let m = fx.window(root);
        let inside = fx.window(m);
        fx.tree.set_modal(m).unwrap();
        let mut controller = ModalWindowController::new();
        controller.add_system_modal_window(&fx.tree, m).unwrap();

        assert!(!controller.is_window_blocked(&fx.tree, m));
        assert!(!controller.is_window_blocked(&fx.tree, inside));
        assert_eq!(controller.target_for_window(&fx.tree, Some(inside)), Some(inside));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let m = fx.window(root);
        let mut controller = ModalWindowController::new();
        controller.add_system_modal_window(&fx.tree, m).unwrap();
        let id = fx.tree.id_of(m).unwrap();
        assert_eq!(controller.add_system_modal_window(&fx.tree, m), Err(WsError::AlreadyModal(id)));
    }

    #[test]
    fn test_hidden_system_modal_is_inactive() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let w = fx.window(root);
        let m = fx.window(root);
        fx.tree.set_modal(m).unwrap();
        let mut controller = ModalWindowController::new();
        controller.add_system_modal_window(&fx.tree, m).unwrap();

        fx.tree.set_visible(m, false).unwrap();
        assert_eq!(controller.active_system_modal_window(&fx.tree), None);
        assert_eq!(controller.target_for_window(&fx.tree, Some(w)), Some(w));
    }

    #[test]
    fn test_most_recently_shown_becomes_active() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let first = fx.window(root);
        let second = fx.window(root);
        let mut controller = ModalWindowController::new();
        for window in [first, second] {
            fx.tree.set_modal(window).unwrap();
            controller.add_system_modal_window(&fx.tree, window).unwrap();
        }
        assert_eq!(controller.active_system_modal_window(&fx.tree), Some(second));

        fx.tree.set_visible(first, false).unwrap();
        assert!(controller.update_drawn_states(&fx.tree).is_empty());
        fx.tree.set_visible(first, true).unwrap();
        assert_eq!(controller.update_drawn_states(&fx.tree), vec![first]);

        assert_eq!(controller.system_modal_windows(), &[second, first]);
        assert_eq!(controller.active_system_modal_window(&fx.tree), Some(first));
    }

    #[test]
    fn test_window_modal_blocks_only_transient_parent_subtree() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let parent = fx.window(root);
        let inside = fx.window(parent);
        let outside = fx.window(root);
        let dialog = fx.window_modal(parent);
        let controller = ModalWindowController::new();

        assert!(controller.is_window_blocked_by(&fx.tree, inside, dialog));
        assert!(!controller.is_window_blocked_by(&fx.tree, outside, dialog));
        assert!(controller.is_window_blocked(&fx.tree, inside));
        assert!(!controller.is_window_blocked(&fx.tree, outside));
        assert!(!controller.is_window_blocked(&fx.tree, dialog));
        assert_eq!(controller.target_for_window(&fx.tree, Some(inside)), Some(dialog));
        assert_eq!(controller.target_for_window(&fx.tree, Some(outside)), Some(outside));
    }

    #[test]
    fn test_nested_window_modal_redirects_recursively() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let app = fx.window(root);
        let dialog = fx.window_modal(app);
        let confirm = fx.window_modal(dialog);
        let controller = ModalWindowController::new();

        assert_eq!(controller.target_for_window(&fx.tree, Some(app)), Some(confirm));
        assert_eq!(controller.target_for_window(&fx.tree, Some(dialog)), Some(confirm));
        assert_eq!(controller.target_for_window(&fx.tree, Some(confirm)), Some(confirm));
    }

    #[test]
    fn test_undrawn_window_modal_does_not_block() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let app = fx.window(root);
        let dialog = fx.window_modal(app);
        fx.tree.set_visible(dialog, false).unwrap();
        let controller = ModalWindowController::new();

        assert!(!controller.is_window_blocked_by(&fx.tree, app, dialog));
        assert_eq!(controller.target_for_window(&fx.tree, Some(app)), Some(app));
    }
}
