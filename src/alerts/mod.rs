//! Owner notifications and position watchers.
//!
//! - `AlertDispatcher` stores notifications and fans them out to sinks
//! - `PositionMonitor` raises position-health and APY-drop alerts

mod dispatcher;
mod monitor;
mod types;

pub use dispatcher::{AlertDispatcher, AlertSetting, LogSink, NotificationSink, SUBSCRIBABLE};
pub use monitor::PositionMonitor;
pub use types::{AlertCategory, AlertSubscription, Notification};
