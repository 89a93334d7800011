pub mod arbiter;
pub mod connection;
pub mod event_pump;
pub mod observer;
pub mod registry;

pub use arbiter::LayoutArbiter;
pub use connection::create_connection;
pub use event_pump::EventPump;
pub use observer::TracingObserver;
