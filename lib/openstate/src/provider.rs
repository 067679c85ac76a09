// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers allow the engine to work in different contexts by
//! allowing various implementations of core services to be plugged
//! into a [`Datapath`]. Logging is the obvious one: unit tests print
//! to stdout, the `ostd` daemon hands messages to its structured
//! logger. If something doesn't have at least two obvious
//! implementations, it probably doesn't need to be a provider.
//!
//! [`Datapath`]: crate::engine::datapath::Datapath

use crate::api::Field;
use core::fmt;
use core::fmt::Display;
use std::sync::Arc;

/// The set of all platform-specific providers required by a datapath.
pub struct Providers {
    pub log: Box<dyn LogProvider>,

    /// Receives a push for every state change, if set.
    pub observer: Option<Arc<dyn StateObserver>>,
}

impl Providers {
    pub fn new(log: Box<dyn LogProvider>) -> Self {
        Self { log, observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Debug => "[DEBUG]",
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Extension hook for unsolicited state-change notifications.
///
/// The core never sends these to a controller itself; a host that
/// wants to push `StateNotification`s registers an observer and does
/// its own delivery.
pub trait StateObserver: Send + Sync {
    /// The state word for `key` in `table_id` is now `state`. A
    /// deletion is reported as `state == 0` with `deleted` set.
    fn state_changed(&self, change: &StateChange<'_>);
}

#[derive(Clone, Copy, Debug)]
pub struct StateChange<'a> {
    pub table_id: u8,
    pub fields: &'a [Field],
    pub key: &'a [u8],
    pub state: u32,
    pub deleted: bool,
}
