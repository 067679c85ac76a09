// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A software OpenState datapath.
//!
//! Keeps a [`Datapath`] in memory and serves the experimenter control
//! channel on a TCP port, one thread per controller connection.

mod config;

use clap::Parser;
use config::Config;
use openstate::engine::Datapath;
use openstate::provider::LogLevel;
use openstate::provider::LogProvider;
use openstate::provider::Providers;
use openstate_ctl::read_frame;
use slog::Drain;
use slog::Logger;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Run a software OpenState datapath.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,
}

/// Hands engine log messages to slog.
struct SlogProvider(Logger);

impl LogProvider for SlogProvider {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Debug => debug!(self.0, "{msg}"),
            LogLevel::Note => info!(self.0, "{msg}"),
            LogLevel::Warn => warn!(self.0, "{msg}"),
            LogLevel::Error => error!(self.0, "{msg}"),
        }
    }
}

fn logger(level: slog::Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    Logger::root(drain, o!("component" => "ostd"))
}

fn serve_conn(dp: &Datapath, mut conn: TcpStream, log: &Logger) {
    loop {
        let req = match read_frame(&mut conn) {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(e) => {
                warn!(log, "dropping connection"; "err" => %e);
                break;
            }
        };

        for reply in dp.handle_ctl(&req) {
            if let Err(e) = conn.write_all(&reply) {
                warn!(log, "write failed"; "err" => %e);
                return;
            }
        }
    }

    info!(log, "controller disconnected");
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    if let Some(level) = cli.log_level {
        cfg.log_level = level;
    }
    cfg.validate()?;

    let log = logger(cfg.level()?);
    let providers = Providers::new(Box::new(SlogProvider(
        log.new(o!("dpid" => cfg.dpid)),
    )));
    let dp = Arc::new(Datapath::new(cfg.dpid, cfg.n_tables, providers));
    for id in &cfg.stateful_tables {
        dp.states().configure(*id, true)?;
    }

    let listener = TcpListener::bind(cfg.listen)?;
    info!(log, "listening"; "addr" => %cfg.listen, "n_tables" => cfg.n_tables);

    for conn in listener.incoming() {
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                warn!(log, "accept failed"; "err" => %e);
                continue;
            }
        };

        let peer = conn
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let log = log.new(o!("peer" => peer));
        info!(log, "controller connected");
        if let Err(e) = conn.set_nodelay(true) {
            warn!(log, "set_nodelay failed"; "err" => %e);
        }

        let dp = Arc::clone(&dp);
        thread::spawn(move || serve_conn(&dp, conn, &log));
    }

    Ok(())
}
