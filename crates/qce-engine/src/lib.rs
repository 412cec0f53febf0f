//! `qce-engine` — the export orchestrator.
//!
//! Ties the pipeline together: one [`orchestrator::ExportEngine`] owns the
//! task registry, drives fetch → parse → download → serialize → finalize
//! per task, persists progress through the store's fire-and-forget writer,
//! and fans events out to WebSocket subscribers. Scheduler firings enter
//! through [`orchestrator::spawn_fired_consumer`].

pub mod events;
pub mod orchestrator;

pub use events::{
    ExportEventData, WsEvent, EVENT_EXPORT_COMPLETE, EVENT_EXPORT_ERROR, EVENT_EXPORT_PROGRESS,
    EVENT_NOTIFICATION,
};
pub use orchestrator::{spawn_fired_consumer, EngineConfig, ExportEngine, ExportOutcome};
