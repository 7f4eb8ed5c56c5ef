pub mod sessions;
pub mod settings;
pub mod signals;

pub use sessions::{CredentialStep, OperatorSessionStore, PendingEdit};
pub use settings::SettingsRepository;
pub use signals::{
    sanitize_signal_id, MessageIdRegistry, MessageRef, SignalRepository, MAX_SIGNAL_ID_LEN,
};
