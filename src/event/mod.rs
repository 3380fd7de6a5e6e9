//! # Scheduled Events
//!
//! Every piece of work a [`Service`](crate::service::Service) performs is an [`Event`]:
//! a timestamped unit with an async `execute`.
//!
//! ## Architecture Overview
//!
//! - **Event**: the trait collaborators implement. [`StopEvent`] is the built-in
//!   sentinel that halts a service's worker.
//! - **PriorityQueue**: the thread-safe min-heap an async service drains. Cancelling
//!   marks entries instead of removing them.
//! - **ScheduledEvent**: a queued event together with its captured timestamp,
//!   insertion sequence and cancelled flag.
//!
//! ## Event Flow
//!
//! ```text
//! ┌──────────┐ add_event ┌─────────────┐  pop   ┌────────┐ execute ┌───────┐
//! │  Caller  │──────────▶│PriorityQueue│───────▶│ Worker │────────▶│ Event │
//! └──────────┘           └─────────────┘        └────────┘         └───────┘
//!                               ▲ cancel / contains / get
//! ```
//!
//! ## Defining an Event
//!
//! ```rust,no_run
//! # use simlink::event::{Event, EventFlow, ExecutionResult};
//! # use simlink::service::Service;
//! # use simlink::timestamp::Timestamp;
//! # use async_trait::async_trait;
//! struct MeterReading {
//!     at: Timestamp,
//! }
//!
//! #[async_trait]
//! impl Event for MeterReading {
//!     fn timestamp(&self) -> Timestamp {
//!         self.at
//!     }
//!
//!     fn name(&self) -> &str {
//!         "meter_reading"
//!     }
//!
//!     async fn execute(&self, service: &Service) -> ExecutionResult<EventFlow> {
//!         tracing::info!("{} reads the meter", service.name());
//!         Ok(EventFlow::Continue)
//!     }
//! }
//! ```

pub mod priority_queue;
mod types;

pub use priority_queue::{PriorityQueue, QueueError, QueueResult, ScheduledEvent};
pub use types::*;
