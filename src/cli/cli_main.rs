// Main CLI entrypoint
// (c) 2024 Ross Younger

use std::process::ExitCode;

use super::args::CliArgs;

use crate::{
    config::{Configuration, Manager},
    server::server_main,
    util::setup_tracing,
};
use anstream::{eprintln, println};
use clap::Parser;
use tracing::info_span;

/// Main CLI entrypoint
pub fn cli() -> anyhow::Result<ExitCode> {
    let args = CliArgs::parse();
    if args.config_files {
        for f in Manager::config_files() {
            println!("{f}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut manager = Manager::new();
    if let Some(file) = &args.config_file {
        manager.merge_toml_file(file);
    }
    manager.merge_provider(args.config.clone());

    if args.show_config {
        println!("{}", manager.to_display_adapter::<Configuration>(true));
        return Ok(ExitCode::SUCCESS);
    }

    let config = match manager.get::<Configuration>() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}ERROR{:#} {e}", super::styles::ERROR, super::styles::ERROR);
            return Ok(ExitCode::FAILURE);
        }
    };
    run_server(&args, config)
}

#[tokio::main]
async fn run_server(args: &CliArgs, config: Configuration) -> anyhow::Result<ExitCode> {
    let trace_level = if args.debug { "debug" } else { "info" };
    setup_tracing(trace_level, config.environment, args.log_file.as_deref())
        .inspect_err(|e| eprintln!("{e:?}"))?;
    let _span = info_span!("sshpipe", env = %config.environment).entered();

    Ok(server_main(config)
        .await
        .inspect_err(|e| tracing::error!("{e:#}"))
        .map_or(ExitCode::FAILURE, |()| ExitCode::SUCCESS))
}
