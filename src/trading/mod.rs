pub mod fill_monitor;
pub mod journal;
pub mod orchestrator;
pub mod supervisor;

pub use fill_monitor::FillMonitor;
pub use journal::{JsonlJournal, Period, PerformanceSummary, TradeJournal};
pub use orchestrator::{ExecutionReport, LegRole, TradeOrchestrator};
pub use supervisor::{spawn_supervised, TaskOutcome};
