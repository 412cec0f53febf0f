//! `qce-scheduler` — cron evaluation and scheduled-export firing.
//!
//! # Overview
//!
//! Scheduled exports are persisted in the task store. The
//! [`engine::SchedulerEngine`] polls every minute and fires any schedule
//! whose `next_run` has arrived, computing the concrete time window
//! (`yesterday`, `last-week`, …) at fire time and handing the work to the
//! export engine over mpsc.
//!
//! # Schedule kinds
//!
//! | Kind      | Behaviour                                             |
//! |-----------|-------------------------------------------------------|
//! | `daily`   | Fire at HH:MM local every day                         |
//! | `weekly`  | Fire at HH:MM local on one weekday (`options.weekday`)|
//! | `monthly` | Fire at HH:MM local on one day (`options.dayOfMonth`) |
//! | `custom`  | Full 5-field cron expression                          |

pub mod cron;
pub mod engine;
pub mod error;
pub mod window;

pub use cron::CronExpr;
pub use engine::{compute_next_run, FiredExport, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use window::compute_window;
