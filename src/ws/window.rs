//! Server Window
//!
//! A window as the dispatch core sees it: hierarchy links, bounds,
//! visibility, modality, and the clients it belongs to.

use slotmap::new_key_type;

use crate::shared::{Geometry, Insets, Point};
use crate::ws::ids::{ClientId, CursorId, WindowId};

new_key_type! {
    /// Generation-checked handle to a window in the `WindowTree`.
    /// Resolves to `None` once the window is destroyed.
    pub struct WindowKey;
}

#[derive(Debug, Clone)]
pub struct ServerWindow {
    pub(crate) id: WindowId,
    pub(crate) parent: Option<WindowKey>,
    /// Children ordered bottom to top
    pub(crate) children: Vec<WindowKey>,
    pub(crate) transient_parent: Option<WindowKey>,
    pub(crate) transient_children: Vec<WindowKey>,
    /// Bounds relative to the parent. Display roots use screen coordinates.
    pub(crate) bounds: Geometry,
    pub(crate) visible: bool,
    pub(crate) modal: bool,
    pub(crate) is_display_root: bool,
    /// Client area inside the bounds; everything outside it is non-client.
    /// `None` means the whole window is client area.
    pub(crate) client_area: Option<Insets>,
    pub(crate) embedded_client: Option<ClientId>,
    pub(crate) cursor: CursorId,
    pub(crate) non_client_cursor: CursorId,
}

impl ServerWindow {
    pub(crate) fn new(id: WindowId, bounds: Geometry) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            transient_parent: None,
            transient_children: Vec::new(),
            bounds,
            visible: false,
            modal: false,
            is_display_root: false,
            client_area: None,
            embedded_client: None,
            cursor: CursorId::POINTER,
            non_client_cursor: CursorId::POINTER,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Client that created the window
    pub fn owner(&self) -> ClientId {
        self.id.client_id
    }

    pub fn parent(&self) -> Option<WindowKey> {
        self.parent
    }

    pub fn children(&self) -> &[WindowKey] {
        &self.children
    }

    pub fn transient_parent(&self) -> Option<WindowKey> {
        self.transient_parent
    }

    pub fn transient_children(&self) -> &[WindowKey] {
        &self.transient_children
    }

    pub fn bounds(&self) -> Geometry {
        self.bounds
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_modal(&self) -> bool {
        self.modal
    }

    pub fn is_display_root(&self) -> bool {
        self.is_display_root
    }

    pub fn embedded_client(&self) -> Option<ClientId> {
        self.embedded_client
    }

    pub fn cursor(&self) -> CursorId {
        self.cursor
    }

    pub fn non_client_cursor(&self) -> CursorId {
        self.non_client_cursor
    }

    /// Returns true if `local` (relative to this window's origin) falls outside
    /// the client area.
    pub fn is_location_in_non_client_area(&self, local: Point) -> bool {
        let Some(insets) = self.client_area else {
            return false;
        };
        let local_bounds = Geometry::new(0, 0, self.bounds.width, self.bounds.height);
        local_bounds.contains(local) && !local_bounds.inset(insets).contains(local)
    }
}
