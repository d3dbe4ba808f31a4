// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-drive control engine: a cooperative state machine that takes a
//! drive from discovery through activation to serving, and runs the
//! long-lived maintenance protocols (health check, firmware download,
//! sanitize, disk collect, hibernate) against it.
//!
//! One [`DriveBuilder::spawn`] call produces one background task per
//! drive and a cloneable [`DriveHandle`] for submitting requests and
//! management events.

#![forbid(unsafe_code)]

mod class;
mod conditions;
mod config;
mod dispatch;
mod engine;
mod object;
mod queue;
mod request;

#[cfg(test)]
mod tests;

pub use config::EngineConfig;
pub use engine::ConditionId;
pub use engine::CrankObserver;
pub use engine::CrankOutcome;
pub use engine::EngineState;
pub use engine::NullObserver;
pub use object::DriveBuilder;
pub use object::DriveHandle;
pub use request::RequestError;
pub use request::RequestKind;
pub use request::RequestPayload;
pub use request::RequestResult;
pub use request::Response;
