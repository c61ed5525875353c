//! `plansmith` command-line entry point

use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plansmith_cli::{render_snapshot, simulate, validate, SimulateOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("plansmith")
        .version(plansmith_core::VERSION)
        .about("Staged agent pipelines for test-plan generation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate agent and pipeline definitions")
                .arg(
                    Arg::new("definitions")
                        .long("definitions")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("YAML document with agents and pipelines"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run one job offline with the echo model client")
                .arg(
                    Arg::new("definitions")
                        .long("definitions")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("YAML document with agents and pipelines"),
                )
                .arg(
                    Arg::new("sections")
                        .long("sections")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of sections"),
                )
                .arg(
                    Arg::new("pipeline")
                        .long("pipeline")
                        .help("Pipeline id (defaults to the default pipeline)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML engine configuration"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the final poll result as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn path_arg(args: &ArgMatches, name: &str) -> PathBuf {
    args.get_one::<PathBuf>(name).cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("validate", args)) => {
            let report = validate(&path_arg(args, "definitions"))?;
            print!("{}", report.render());
        }
        Some(("simulate", args)) => {
            let options = SimulateOptions {
                definitions: path_arg(args, "definitions"),
                sections: path_arg(args, "sections"),
                pipeline: args.get_one::<String>("pipeline").cloned(),
                config: args.get_one::<PathBuf>("config").cloned(),
            };
            let snapshot = simulate(&options).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", render_snapshot(&snapshot));
            }
            if snapshot.status != plansmith_jobs::JobStatus::Completed {
                std::process::exit(1);
            }
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}
