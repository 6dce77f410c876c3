//! Session supervision: the mount-scoped guard and the expiry countdown widget.

pub mod guard;
pub mod widget;

pub use guard::SessionGuard;
pub use widget::{SessionStatusWidget, WidgetView};
