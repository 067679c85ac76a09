// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The datapath side of OpenState.
//!
//! All code under this namespace is guarded by the `engine` feature flag.
pub mod ctl;
pub mod datapath;
pub mod global_state;
pub mod key;
pub mod packet;
pub mod pipeline;
pub mod predicate;
pub mod rule;
pub mod stat;
pub mod state_table;

pub use datapath::Datapath;
pub use packet::PacketMeta;
pub use pipeline::Pipeline;
pub use pipeline::PipelineBuilder;
pub use pipeline::ProcessResult;
