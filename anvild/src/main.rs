/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! anvild: the netboot dispatch engine.
//!
//! Ingests raw DHCP packets, classifies each as a netboot candidate,
//! selects the next-stage boot artifact for the client's firmware and
//! architecture, and serves that artifact over TFTP and HTTP together
//! with a generated boot script that hands the machine to the workload
//! agent.

mod command_line;
mod orchestrator;

use command_line::Args;
use tracing_subscriber::{filter::EnvFilter, filter::LevelFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), color_eyre::Report> {
    color_eyre::install()?;

    let args = Args::load();

    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            match args.debug {
                0 => LevelFilter::INFO,
                1 => {
                    std::env::set_var("RUST_BACKTRACE", "1");
                    LevelFilter::DEBUG
                }
                _ => {
                    std::env::set_var("RUST_BACKTRACE", "1");
                    LevelFilter::TRACE
                }
            }
            .into(),
        )
        .add_directive("hyper=warn".parse()?)
        .add_directive("h2=warn".parse()?)
        .add_directive("kube=warn".parse()?);

    tracing_subscriber::registry()
        .with(fmt::Layer::default().compact())
        .with(env_filter)
        .try_init()?;

    orchestrator::run(args).await
}
