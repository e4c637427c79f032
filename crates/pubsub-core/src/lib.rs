//! # Pub/Sub Core - Typed Subscription Dispatch
//!
//! Registers typed handlers against topics and runs each broker delivery
//! through a fixed pipeline.
//!
//! ## Pipeline
//!
//! ```text
//!  broker callback
//!        │
//!        ▼
//!   ┌──────────┐  fail   Internal, no span opened
//!   │  decode  │ ──────▶
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐  fail   Internal, handler never runs
//!   │   span   │ ──────▶
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐  panic  Internal, carries the panic message
//!   │ handler  │ ──────▶
//!   └──────────┘
//!        │
//!        ▼
//!   finish span ──▶ outcome to broker (Ok = ack, Err = redeliver)
//! ```
//!
//! ## Rules
//!
//! - Names are kebab-case, 1-63 chars, start with a letter, end with a
//!   letter or digit.
//! - Configuration errors surface at registration, never at delivery.
//! - A handler panic never unwinds into the broker.
//! - Every span begun is finished exactly once.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use adapters::{
    ContentTypeCodec, DeploymentConfig, InMemoryBroker, PublishReport, RecordingTracer,
    StaticConfigResolver, TracingTracer,
};
pub use config::RuntimeSettings;
pub use domain::{
    DeliveryAttempt, DeliveryContext, DeliveryGuarantee, DeliveryOutcome, RetryPolicy,
    RetryPolicyConfig, SubscriptionDescriptor, Topic, TopicConfig,
};
pub use error::{ConfigError, DecodeError, DispatchError, ErrorCode, HandlerError};
pub use ports::{Broker, ConfigResolver, DispatchMetrics, EnvelopeCodec, MessageHandler, Tracer};
pub use service::{Subscription, SubscriptionConfig, SubscriptionRegistry};
