pub mod direction;
pub mod settings;
pub mod signal;

pub use direction::*;
pub use settings::{SettingKey, SettingKind, Settings};
pub use signal::{InboundAlert, Signal, SignalField};
