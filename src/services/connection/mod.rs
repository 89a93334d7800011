//! Connection service: responsibility and boundaries
//!
//! This module owns the single X11 connection, the XKB extension binding and
//! the keymap/state pair of the core keyboard. It exposes request/reply
//! operations and decoded events. It MUST NOT contain any per-application
//! policy; layout decisions are made exclusively by LayoutArbiter.

mod dry_connection;
mod keyboard_state;
mod r#trait;
mod x11_connection;

pub use self::dry_connection::DryRunConnection;
pub use self::r#trait::{create_connection, DisplayConnection};
