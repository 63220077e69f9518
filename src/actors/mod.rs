//! Actor-based ingestion pipeline
//!
//! Each actor runs as an independent async task and is driven through a
//! cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   MQTT broker
//!        │ publish
//! ┌──────▼───────────┐  RawMessage   ┌──────────────┐
//! │ BrokerSubscriber │──────────────▶│ IngestQueue  │ (unbounded mpsc)
//! └──────────────────┘               └──────┬───────┘
//!                                           │ drain every interval
//!                                   ┌───────▼────────┐
//!                                   │ PipelineActor  │
//!                                   │  decode        │
//!                                   │  evaluate      │──▶ alert log
//!                                   │  rolling window│
//!                                   │  persist       │──▶ storage backend
//!                                   └───────┬────────┘
//!                                           │ watch
//!                                     Snapshot readers
//! ```
//!
//! ## Actor Types
//!
//! - **BrokerSubscriber**: Keeps the broker subscription alive and enqueues
//!   raw payloads
//! - **PipelineActor**: Sole owner of the rolling window, gas state,
//!   persister and alert log
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **State**: Snapshots and connection state are published on `watch` channels
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod pipeline;
pub mod subscriber;
