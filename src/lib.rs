//! # simlink: Messaging and Scheduling for Multi-Agent Simulations
//!
//! simlink is the substrate independent simulation services (clients, allocators,
//! schedulers, network actors) run on. It lets them find each other at runtime,
//! exchange request/reply messages in-process or over TCP, and drive their own
//! timelines of scheduled events.
//!
//! ## Building Blocks
//!
//! ### 1. Communication Ports
//! One request/reply interface over two transports:
//! - In-process calls between paired local ports ([`port`])
//! - One-shot TCP round trips with a length-prefixed JSON codec ([`port::codec`])
//!
//! ### 2. Discovery
//! A well-known port that resolves a logical service type to a locator, and a client
//! helper returning a ready send port ([`discovery`]).
//!
//! ### 3. Events and Services
//! - Timestamped events and a cancellable priority queue ([`event`])
//! - Services running events inline or on their own worker ([`service`])
//! - Workers that hand task failures back to their owner ([`worker`])
//!
//! ## Message Flow
//!
//! ```text
//! Service → Event::execute → CommunicationPort::send → (call | TCP) → peer handler
//!                                     ▲                                   │
//!                                     └──────────── Replier::reply ◀──────┘
//! ```
//!
//! ## Configuration
//!
//! [`config::CoreConfig`] gathers the transport, service and discovery settings. Each
//! port and service receives its settings explicitly at construction.

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod port;
pub mod service;
pub mod timestamp;
pub mod value;
pub mod worker;

// Re-exports
pub use error::*;
pub use value::{payload, Payload, Value};
