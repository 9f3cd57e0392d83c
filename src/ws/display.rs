//! Display Management
//!
//! Displays and the per-user window manager roots inside them. Each display
//! has one server-owned root window in screen coordinates; every user session
//! gets its own window manager root as a child of it, embedding that user's
//! window manager client. Only the active user's roots are visible.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::shared::{Geometry, Point};
use crate::ws::ids::{DisplayId, UserId};
use crate::ws::window::WindowKey;

/// A single display
#[derive(Debug, Clone)]
pub struct Display {
    id: DisplayId,
    /// Screen bounds
    bounds: Geometry,
    root: WindowKey,
    wm_roots: HashMap<UserId, WindowKey>,
}

impl Display {
    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn bounds(&self) -> Geometry {
        self.bounds
    }

    pub fn root(&self) -> WindowKey {
        self.root
    }

    /// Window manager root of `user` on this display
    pub fn wm_root(&self, user: &UserId) -> Option<WindowKey> {
        self.wm_roots.get(user).copied()
    }

    pub fn wm_roots(&self) -> impl Iterator<Item = (&UserId, WindowKey)> {
        self.wm_roots.iter().map(|(user, &root)| (user, root))
    }
}

/// Per-user display state
#[derive(Debug, Clone, Default)]
pub struct UserDisplayManager {
    /// Last known mouse location in screen coordinates
    cursor_location: Point,
}

impl UserDisplayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor_location(&self) -> Point {
        self.cursor_location
    }

    pub fn on_mouse_cursor_location_changed(&mut self, location: Point) {
        self.cursor_location = location;
    }
}

/// Display manager
#[derive(Debug, Default)]
pub struct DisplayManager {
    displays: BTreeMap<DisplayId, Display>,
    user_display_managers: HashMap<UserId, UserDisplayManager>,
    next_display_id: u32,
}

impl DisplayManager {
    /// Create a new display manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a display whose root window already exists
    pub fn add_display(&mut self, root: WindowKey, bounds: Geometry) -> DisplayId {
        self.next_display_id += 1;
        let id = DisplayId(self.next_display_id);
        self.displays.insert(
            id,
            Display { id, bounds, root, wm_roots: HashMap::new() },
        );
        debug!("Added display {:?} with bounds {:?}", id, bounds);
        id
    }

    pub fn display(&self, id: DisplayId) -> Option<&Display> {
        self.displays.get(&id)
    }

    /// Displays in id order
    pub fn displays(&self) -> impl Iterator<Item = &Display> {
        self.displays.values()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }

    /// First display whose bounds contain `location`
    pub fn display_containing(&self, location: Point) -> Option<&Display> {
        self.displays.values().find(|display| display.bounds.contains(location))
    }

    pub fn set_wm_root(&mut self, display: DisplayId, user: UserId, root: WindowKey) -> bool {
        match self.displays.get_mut(&display) {
            Some(display) => {
                display.wm_roots.insert(user, root);
                true
            }
            None => false,
        }
    }

    /// Every window manager root of `user`, in display order
    pub fn wm_roots_for_user(&self, user: &UserId) -> Vec<WindowKey> {
        self.displays.values().filter_map(|display| display.wm_root(user)).collect()
    }

    pub fn add_user(&mut self, user: UserId) {
        self.user_display_managers.entry(user).or_default();
    }

    pub fn user_display_manager(&self, user: &UserId) -> Option<&UserDisplayManager> {
        self.user_display_managers.get(user)
    }

    pub fn user_display_manager_mut(&mut self, user: &UserId) -> &mut UserDisplayManager {
        self.user_display_managers.entry(user.clone()).or_default()
    }

    /// Last known mouse location of `user`; the origin if the user never moved it
    pub fn cursor_location(&self, user: &UserId) -> Point {
        self.user_display_manager(user)
            .map(UserDisplayManager::cursor_location)
            .unwrap_or_default()
    }
}
