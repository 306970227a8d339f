//! Fleet Pilot drives a fleet of remote device emulators through multi-stage
//! social-automation workflows: account login, engagement warmup, profile
//! setup, and content posting.
//!
//! Each device gets its own state machine ([`machine::DeviceMachine`]) that
//! runs a shared bootstrap and then hands over to a pluggable
//! [`strategy::WorkflowStrategy`]. The [`orchestrator::Orchestrator`] fetches
//! the fleet, reconciles devices against accounts ([`matcher`]), and drives a
//! bounded number of machines concurrently, publishing progress through a
//! broadcast [`events::EventSender`].

pub mod account;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod machine;
pub mod matcher;
pub mod orchestrator;
pub mod poll;
pub mod retry;
pub mod strategy;

pub use error::{Error, Result};
