//! # FlowPilot Scheduler
//!
//! Decides *when* flows run. Launching them is delegated to a
//! [`FlowRunner`](flowpilot_core::FlowRunner).
//!
//! ## Architecture
//! ```text
//! ScheduleRegistry (create/update/delete/toggle, JSON store)
//!   ├── ScheduleKind: daily | weekly | specific_dates | custom
//!   │                 interval | multiple_times | day_specific
//!   ├── recurrence::next_run / should_fire_now
//!   └── TriggerTable (schedule id → triggers)
//!
//! Dispatcher (tokio interval, ~1s)
//!   └── tick → registry.collect_due(now) → spawn runner.execute_flow
//! ```

pub mod dispatch;
pub mod recurrence;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod time;
pub mod triggers;

pub use dispatch::Dispatcher;
pub use registry::{FiredSchedule, NextRun, ScheduleRegistry, ScheduleUpdate};
pub use schedule::{ScheduleConfig, ScheduleKind, ScheduleType};
pub use store::ScheduleStore;
pub use time::{Clock, DayOfWeek, TimeOfDay, system_clock};
pub use triggers::{Trigger, TriggerTable};
