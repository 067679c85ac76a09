// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Platform services the engine is written against.
//!
//! The datapath only depends on these wrappers, never directly on the
//! std primitives behind them, so an alternate host can provide its
//! own implementation.
pub mod sync;
