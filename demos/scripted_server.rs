//! Serves a single scripted TCP exchange read from files.
//!
//! Each --expect file holds bytes the peer must send and each --respond file
//! holds bytes to send back; they are played in the order given on the
//! command line.
//!
//!     cargo run --example scripted_server -- --port 12345 \
//!         --expect request.txt --respond response.txt

use std::fs;
use std::process::ExitCode;
use std::time::Duration;

use clap::{arg, ArgAction, ArgMatches, Command};
use log::info;

use mockwire::{MockServer, ScriptStream};

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();

    let matches = Command::new("scripted_server")
        .version("1.0")
        .about("Accepts one connection and checks it against a scripted exchange")
        .arg(arg!(--port <PORT>).default_value("12345").value_parser(clap::value_parser!(u16)))
        .arg(arg!(--expect <FILE> "bytes the peer must send").action(ArgAction::Append))
        .arg(arg!(--respond <FILE> "bytes sent back to the peer").action(ArgAction::Append))
        .arg(arg!(--timeout <SECONDS>).default_value("30").value_parser(clap::value_parser!(u64)))
        .get_matches();

    let port = *matches.get_one::<u16>("port").expect("port has a default");
    let timeout = Duration::from_secs(*matches.get_one::<u64>("timeout").expect("timeout has a default"));

    let server = MockServer::bind(port)?;
    info!("listening on {}", server.local_addr());

    for (stream, file) in script_order(&matches, &server) {
        let bytes = fs::read(&file)?;
        info!("{:?}: {} byte(s) from {file}", stream.kind(), bytes.len());
        stream.send(bytes);
    }

    if !server.wait_for_script(timeout) {
        info!("script not finished after {timeout:?}");
    }

    match server.verify() {
        Ok(()) => {
            println!("exchange matched");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("exchange failed: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

// Interleaves --expect and --respond values by their position on the command line.
fn script_order(matches: &ArgMatches, server: &MockServer) -> Vec<(ScriptStream, String)> {
    let mut steps = Vec::new();

    for (id, stream) in [("expect", server.expected()), ("respond", server.response())] {
        let (Some(indices), Some(files)) = (matches.indices_of(id), matches.get_many::<String>(id)) else {
            continue;
        };
        for (index, file) in indices.zip(files) {
            steps.push((index, stream.clone(), file.clone()));
        }
    }

    steps.sort_by_key(|(index, _, _)| *index);
    steps.into_iter().map(|(_, stream, file)| (stream, file)).collect()
}
