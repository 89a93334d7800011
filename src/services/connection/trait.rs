use crate::config::Config;
use crate::error::Result;
use crate::events::{
    ApplicationIdentity, DisplayEvent, GroupState, LayoutTarget, WindowEventMask, WindowId,
};
use std::sync::Arc;

/// Access to the display server and its XKB binding for the core keyboard.
///
/// Every method is a request/reply pair over the wire. Implementations must
/// accept calls from the event pump and the arbiter concurrently.
pub trait DisplayConnection: Send + Sync {
    fn root_window(&self) -> WindowId;

    /// False once the underlying transport reported an unrecoverable error
    fn is_healthy(&self) -> bool;

    /// Live group index from the extension state
    fn current_layout_index(&self) -> Result<usize>;

    /// Issue a lock-group request; does not wait for the resulting StateNotify
    fn request_layout_switch(&self, target: LayoutTarget) -> bool;

    /// Fresh snapshot of the group names, empty on transient failure
    fn layout_names(&self) -> Vec<String>;

    /// XKB symbols name, "NONE" when unavailable
    fn symbols_label(&self) -> String;

    fn active_window(&self) -> Option<WindowId>;

    /// Empty identity when WM_CLASS cannot be read
    fn window_identity(&self, window: WindowId) -> ApplicationIdentity;

    /// Best effort, empty string on failure
    fn window_title(&self, window: WindowId) -> String;

    fn set_window_title(&self, window: WindowId, title: &str) -> bool;

    fn set_window_event_mask(&self, window: WindowId, mask: WindowEventMask);

    /// Next queued event without blocking
    fn poll_event(&self) -> Result<Option<DisplayEvent>>;

    /// Device id the keymap/state pair is bound to
    fn keyboard_device_id(&self) -> u8;

    /// Tear down the keymap/state pair and build a new one from the device
    fn rebuild_keyboard(&self) -> Result<()>;

    /// Apply a StateNotify to the cached modifier/group state
    fn update_keyboard_state(&self, state: GroupState);
}

/// Factory function to create an appropriate connection based on the dry_run flag
pub fn create_connection(config: &Config, dry_run: bool) -> Result<Arc<dyn DisplayConnection>> {
    if dry_run {
        Ok(Arc::new(super::dry_connection::DryRunConnection::demo()))
    } else {
        Ok(Arc::new(super::x11_connection::X11Connection::connect(
            &config.connection.display,
        )?))
    }
}
