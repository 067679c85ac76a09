// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! OpenState: per-flow finite state for OpenFlow match-action tables.
//!
//! The crate is split the same way the rest of the workspace is:
//!
//! * [`api`]: the shared API types plus the experimenter wire codec
//!   ([`wire`]) used by both the datapath and its controllers.
//!
//! * [`engine`]: the datapath side. State tables, the global flag
//!   register, the match-action pipeline, and the control dispatcher
//!   that ties them to the wire messages. Guarded by the `engine`
//!   feature.
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "api", test))]
pub mod api;
#[cfg(any(feature = "engine", test))]
pub mod ddi;
#[cfg(any(feature = "engine", test))]
pub mod engine;
#[cfg(any(feature = "api", test))]
pub mod print;
#[cfg(any(feature = "engine", test))]
pub mod provider;
#[cfg(any(feature = "api", test))]
pub mod wire;
