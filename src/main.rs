#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("TOML configuration file (environment variables still apply on top)")
}

fn backend_arg() -> Arg {
    Arg::new("backend")
        .short('b')
        .long("backend")
        .value_name("BACKEND")
        .help("Model backend: lexicon, or candle when built with the `candle` feature")
        .default_value("lexicon")
}

fn model_arg() -> Arg {
    Arg::new("model")
        .short('m')
        .long("model")
        .value_name("NAME")
        .help("Model name, local path or URL to load first")
}

#[tokio::main]
async fn main() {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let matches = Command::new("geko")
        .version(VERSION)
        .about("Geko AI core - text classification with validation and model fallback")
        .subcommand_required(false)
        .subcommand(
            Command::new("analyze")
                .about("Run one text through the pipeline and print the JSON result")
                .arg(
                    Arg::new("text")
                        .short('t')
                        .long("text")
                        .value_name("TEXT")
                        .help("Text to analyze")
                        .required(true),
                )
                .arg(
                    Arg::new("no-postprocess")
                        .long("no-postprocess")
                        .help("Skip formatting fields on the result")
                        .action(ArgAction::SetTrue),
                )
                .arg(config_arg())
                .arg(model_arg())
                .arg(backend_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Print pipeline configuration and host health")
                .arg(config_arg())
                .arg(model_arg())
                .arg(backend_arg()),
        )
        .subcommand(
            Command::new("serve")
                .about("Start the HTTP API")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Host address to bind to"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Port to bind the server to")
                        .value_parser(clap::value_parser!(u16)),
                )
                .arg(config_arg())
                .arg(model_arg())
                .arg(backend_arg()),
        )
        .get_matches();

    let outcome = match matches.subcommand() {
        Some(("analyze", sub_matches)) => commands::analyze::run(sub_matches),
        Some(("status", sub_matches)) => commands::status::run(sub_matches),
        Some(("serve", sub_matches)) => commands::serve::run(sub_matches).await,
        _ => {
            println!("Geko v{}", VERSION);
            println!("Use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
