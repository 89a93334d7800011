pub mod keyboard;
pub mod window;

pub use keyboard::{GroupState, LayoutSet, LayoutTarget, MapInvalidation, PolicyState};
pub use window::{ApplicationIdentity, WindowEventMask, WindowId};

/// Какое из отслеживаемых свойств изменилось
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedProperty {
    ActiveWindow,
    WindowName,
    Other,
}

/// Событие протокола после декодирования, до применения правил EventPump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    PropertyChanged {
        window: WindowId,
        property: WatchedProperty,
    },
    MapChanged,
    NewKeyboard {
        device_id: u8,
        keycodes_changed: bool,
    },
    StateChanged {
        state: GroupState,
        group_changed: bool,
    },
    Other,
}

/// Уведомления от EventPump для LayoutArbiter (в порядке появления событий)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ActiveWindowChanged(WindowId),
    WindowTitleChanged(WindowId),
    KeyboardLayoutChanged(usize),
    KeyboardMapInvalidated(MapInvalidation),
    ConnectionLost,
}
