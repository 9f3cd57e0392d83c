//! Window Tree
//!
//! Owns every `ServerWindow`, keyed by generation-checked `WindowKey`s.
//! Answers the hierarchy questions the dispatch core asks: containment,
//! drawn state, coordinate conversion and hit-testing.

use slotmap::SlotMap;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{WsError, WsResult};
use crate::shared::{Geometry, Insets, Point};
use crate::ws::ids::{ClientId, CursorId, WindowId};
use crate::ws::window::{ServerWindow, WindowKey};

#[derive(Debug, Default)]
pub struct WindowTree {
    windows: SlotMap<WindowKey, ServerWindow>,
    by_id: HashMap<WindowId, WindowKey>,
}

impl WindowTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unparented, hidden window
    pub fn create_window(&mut self, id: WindowId, bounds: Geometry) -> WsResult<WindowKey> {
        if self.by_id.contains_key(&id) {
            return Err(WsError::DuplicateWindowId(id));
        }
        let key = self.windows.insert(ServerWindow::new(id, bounds));
        self.by_id.insert(id, key);
        debug!("Created window {} with bounds {:?}", id, bounds);
        Ok(key)
    }

    /// Create a visible display root. Its bounds are in screen coordinates.
    pub fn create_display_root(&mut self, id: WindowId, bounds: Geometry) -> WsResult<WindowKey> {
        let key = self.create_window(id, bounds)?;
        let window = &mut self.windows[key];
        window.is_display_root = true;
        window.visible = true;
        Ok(key)
    }

    pub fn get(&self, key: WindowKey) -> Option<&ServerWindow> {
        self.windows.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: WindowKey) -> WsResult<&mut ServerWindow> {
        self.windows.get_mut(key).ok_or(WsError::WindowNotFound)
    }

    pub fn contains_key(&self, key: WindowKey) -> bool {
        self.windows.contains_key(key)
    }

    pub fn lookup(&self, id: WindowId) -> Option<WindowKey> {
        self.by_id.get(&id).copied()
    }

    pub fn id_of(&self, key: WindowKey) -> Option<WindowId> {
        self.get(key).map(|window| window.id)
    }

    pub fn keys(&self) -> impl Iterator<Item = WindowKey> + '_ {
        self.windows.keys()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn parent(&self, key: WindowKey) -> Option<WindowKey> {
        self.get(key).and_then(|window| window.parent)
    }

    /// Add `child` on top of `parent`'s children, removing it from any previous parent
    pub fn add_child(&mut self, parent: WindowKey, child: WindowKey) -> WsResult<()> {
        let parent_id = self.id_of(parent).ok_or(WsError::WindowNotFound)?;
        let child_id = self.id_of(child).ok_or(WsError::WindowNotFound)?;
        if self.contains(child, parent) || self.windows[child].is_display_root {
            return Err(WsError::InvalidHierarchy { parent: parent_id, child: child_id });
        }
        self.remove_from_parent(child);
        self.windows[parent].children.push(child);
        self.windows[child].parent = Some(parent);
        Ok(())
    }

    pub fn remove_from_parent(&mut self, child: WindowKey) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(window) = self.windows.get_mut(parent) {
            window.children.retain(|&key| key != child);
        }
        if let Some(window) = self.windows.get_mut(child) {
            window.parent = None;
        }
    }

    pub fn set_visible(&mut self, key: WindowKey, visible: bool) -> WsResult<()> {
        self.get_mut(key)?.visible = visible;
        Ok(())
    }

    pub fn set_bounds(&mut self, key: WindowKey, bounds: Geometry) -> WsResult<()> {
        self.get_mut(key)?.bounds = bounds;
        Ok(())
    }

    pub fn set_modal(&mut self, key: WindowKey) -> WsResult<()> {
        self.get_mut(key)?.modal = true;
        Ok(())
    }

    pub fn set_client_area(&mut self, key: WindowKey, insets: Option<Insets>) -> WsResult<()> {
        self.get_mut(key)?.client_area = insets;
        Ok(())
    }

    pub fn set_embedded_client(&mut self, key: WindowKey, client: Option<ClientId>) -> WsResult<()> {
        self.get_mut(key)?.embedded_client = client;
        Ok(())
    }

    pub fn set_cursor(&mut self, key: WindowKey, cursor: CursorId, non_client_cursor: CursorId) -> WsResult<()> {
        let window = self.get_mut(key)?;
        window.cursor = cursor;
        window.non_client_cursor = non_client_cursor;
        Ok(())
    }

    /// Set (or clear) the transient parent of `child`
    pub fn set_transient_parent(&mut self, child: WindowKey, parent: Option<WindowKey>) -> WsResult<()> {
        if !self.contains_key(child) || parent.is_some_and(|p| !self.contains_key(p) || p == child) {
            return Err(WsError::WindowNotFound);
        }
        if let Some(old) = self.windows[child].transient_parent.take() {
            if let Some(window) = self.windows.get_mut(old) {
                window.transient_children.retain(|&key| key != child);
            }
        }
        if let Some(parent) = parent {
            self.windows[parent].transient_children.push(child);
            self.windows[child].transient_parent = Some(parent);
        }
        Ok(())
    }

    /// Destroy `key` and all of its descendants. Returns the destroyed keys,
    /// deepest first; every one of them is invalid afterwards.
    pub fn destroy(&mut self, key: WindowKey) -> WsResult<Vec<WindowKey>> {
        if !self.contains_key(key) {
            return Err(WsError::WindowNotFound);
        }
        let order = self.subtree(key);
        self.remove_from_parent(key);

        for &doomed in &order {
            let _ = self.set_transient_parent(doomed, None);
            let transient_children = std::mem::take(&mut self.windows[doomed].transient_children);
            for child in transient_children {
                if let Some(window) = self.windows.get_mut(child) {
                    window.transient_parent = None;
                }
            }
        }
        for &doomed in &order {
            if let Some(window) = self.windows.remove(doomed) {
                self.by_id.remove(&window.id);
                debug!("Destroyed window {}", window.id);
            }
        }
        Ok(order)
    }

    /// `key` and all of its descendants, deepest first
    pub fn subtree(&self, key: WindowKey) -> Vec<WindowKey> {
        let mut order = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            let Some(window) = self.get(current) else {
                continue;
            };
            order.push(current);
            stack.extend(window.children.iter().copied());
        }
        order.reverse();
        order
    }

    /// Client that receives events aimed at `key`
    pub fn target_client(&self, key: WindowKey, in_nonclient_area: bool) -> ClientId {
        let Some(window) = self.get(key) else {
            return ClientId::INVALID;
        };
        if in_nonclient_area {
            return window.owner();
        }
        window.embedded_client().unwrap_or_else(|| window.owner())
    }

    /// Returns true if `ancestor` is `window` or one of its ancestors
    pub fn contains(&self, ancestor: WindowKey, window: WindowKey) -> bool {
        let mut current = Some(window);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.parent(key);
        }
        false
    }

    /// A window is drawn if it and all of its ancestors are visible and the
    /// chain ends at a display root
    pub fn is_drawn(&self, key: WindowKey) -> bool {
        let mut current = Some(key);
        while let Some(key) = current {
            let Some(window) = self.get(key) else {
                return false;
            };
            if !window.visible {
                return false;
            }
            if window.is_display_root {
                return true;
            }
            current = window.parent;
        }
        false
    }

    /// Origin of the window in screen coordinates
    pub fn screen_origin(&self, key: WindowKey) -> Point {
        let mut origin = Point::default();
        let mut current = Some(key);
        while let Some(key) = current {
            let Some(window) = self.get(key) else {
                break;
            };
            origin = origin + window.bounds.origin();
            current = window.parent;
        }
        origin
    }

    /// Convert a screen location into `key`'s local coordinates
    pub fn to_window_location(&self, key: WindowKey, screen: Point) -> Point {
        screen - self.screen_origin(key)
    }

    /// Deepest visible window under `screen` starting at
    /// `root`. Returns the window and the location in its coordinates.
    /// Children are searched top-most first.
    pub fn deepest_visible_window(&self, root: WindowKey, screen: Point) -> Option<(WindowKey, Point)> {
        let root_window = self.get(root)?;
        if !root_window.visible {
            return None;
        }
        let mut location = self.to_window_location(root, screen);
        let mut current = root;
        'descend: loop {
            let window = &self.windows[current];
            for &child_key in window.children.iter().rev() {
                let Some(child) = self.get(child_key) else {
                    continue;
                };
                if !child.visible || !child.bounds.contains(location) {
                    continue;
                }
                location = location - child.bounds.origin();
                current = child_key;
                continue 'descend;
            }
            return Some((current, location));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(local_id: u32) -> WindowId {
        WindowId::new(ClientId(1), local_id)
    }

    fn tree_with_root() -> (WindowTree, WindowKey) {
        let mut tree = WindowTree::new();
        let root = tree
            .create_display_root(WindowId::new(ClientId::SERVER, 1), Geometry::new(0, 0, 800, 600))
            .unwrap();
        (tree, root)
    }

    fn child(tree: &mut WindowTree, parent: WindowKey, local_id: u32, bounds: Geometry) -> WindowKey {
        let key = tree.create_window(id(local_id), bounds).unwrap();
        tree.add_child(parent, key).unwrap();
        tree.set_visible(key, true).unwrap();
        key
    }

    #[test]
    fn test_duplicate_window_id_rejected() {
        let mut tree = WindowTree::new();
        tree.create_window(id(1), Geometry::default()).unwrap();
        assert_eq!(
            tree.create_window(id(1), Geometry::default()),
            Err(WsError::DuplicateWindowId(id(1)))
        );
    }

    #[test]
    fn test_add_child_rejects_cycles() {
        let (mut tree, root) = tree_with_root();
        let a = child(&mut tree, root, 1, Geometry::new(0, 0, 10, 10));
        let b = child(&mut tree, a, 2, Geometry::new(0, 0, 10, 10));
        assert!(matches!(tree.add_child(b, a), Err(WsError::InvalidHierarchy { .. })));
        assert!(matches!(tree.add_child(a, root), Err(WsError::InvalidHierarchy { .. })));
    }

    #[test]
    fn test_drawn_requires_visible_chain_to_root() {
        let (mut tree, root) = tree_with_root();
        let a = child(&mut tree, root, 1, Geometry::new(0, 0, 10, 10));
        let b = child(&mut tree, a, 2, Geometry::new(0, 0, 10, 10));
        assert!(tree.is_drawn(b));

        tree.set_visible(a, false).unwrap();
        assert!(!tree.is_drawn(b));

        tree.set_visible(a, true).unwrap();
        tree.remove_from_parent(a);
        assert!(!tree.is_drawn(b));
    }

    #[test]
    fn test_hit_test_prefers_topmost_child() {
        let (mut tree, root) = tree_with_root();
        let bottom = child(&mut tree, root, 1, Geometry::new(0, 0, 200, 200));
        let top = child(&mut tree, root, 2, Geometry::new(100, 100, 200, 200));

        assert_eq!(tree.deepest_visible_window(root, Point::new(150, 150)), Some((top, Point::new(50, 50))));
        assert_eq!(tree.deepest_visible_window(root, Point::new(50, 50)), Some((bottom, Point::new(50, 50))));
        assert_eq!(tree.deepest_visible_window(root, Point::new(700, 500)), Some((root, Point::new(700, 500))));
    }

    #[test]
    fn test_hit_test_skips_hidden_and_descends() {
        let (mut tree, root) = tree_with_root();
        let frame = child(&mut tree, root, 1, Geometry::new(100, 100, 300, 300));
        let content = child(&mut tree, frame, 2, Geometry::new(10, 30, 100, 100));
        let hidden = child(&mut tree, root, 3, Geometry::new(100, 100, 300, 300));
        tree.set_visible(hidden, false).unwrap();

        assert_eq!(
            tree.deepest_visible_window(root, Point::new(120, 140)),
            Some((content, Point::new(10, 10)))
        );
        assert_eq!(tree.to_window_location(content, Point::new(120, 140)), Point::new(10, 10));
    }

    #[test]
    fn test_destroy_invalidates_descendants_and_transients() {
        let (mut tree, root) = tree_with_root();
        let a = child(&mut tree, root, 1, Geometry::new(0, 0, 10, 10));
        let b = child(&mut tree, a, 2, Geometry::new(0, 0, 10, 10));
        let dialog = child(&mut tree, root, 3, Geometry::new(0, 0, 10, 10));
        tree.set_transient_parent(dialog, Some(b)).unwrap();

        let destroyed = tree.destroy(a).unwrap();
        assert_eq!(destroyed, vec![b, a]);
        assert!(tree.get(a).is_none());
        assert!(tree.get(b).is_none());
        assert!(tree.lookup(id(2)).is_none());
        assert_eq!(tree.get(dialog).unwrap().transient_parent(), None);
        assert!(tree.get(root).unwrap().children().iter().all(|&key| key != a));
    }

    #[test]
    fn test_non_client_area() {
        let (mut tree, root) = tree_with_root();
        let a = child(&mut tree, root, 1, Geometry::new(0, 0, 200, 100));
        tree.set_client_area(a, Some(Insets::new(24, 0, 0, 0))).unwrap();
        let window = tree.get(a).unwrap();
        assert!(window.is_location_in_non_client_area(Point::new(50, 10)));
        assert!(!window.is_location_in_non_client_area(Point::new(50, 50)));
    }
}
