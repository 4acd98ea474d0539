use std::path::PathBuf;
use std::time::Duration;

use log::error;
use structopt::StructOpt;

use gerrit_client::{ErrorEvent, GerritClient};

#[derive(StructOpt, Debug)]
struct Args {
    /// Gerrit username
    #[structopt(short = "u")]
    username: String,
    /// Gerrit hostname
    hostname: String,
    /// Gerrit SSH port
    #[structopt(short = "p", default_value = "29418")]
    port: u32,
    /// Path to SSH private key
    #[structopt(short = "i", parse(from_os_str))]
    private_key_path: PathBuf,
    /// Enable verbose output
    #[structopt(short = "v")]
    verbose: bool,
}

fn main() {
    let args = Args::from_args();
    stderrlog::new()
        .module(module_path!())
        .module("gerrit_client")
        .timestamp(stderrlog::Timestamp::Second)
        .verbosity(if args.verbose { 5 } else { 2 })
        .init()
        .unwrap();

    let mut client = GerritClient::new(
        format!("{}:{}", args.hostname, args.port),
        args.username,
        args.private_key_path,
    );
    client.start_event_stream();

    loop {
        match client.get_event(Some(Duration::from_secs(60))) {
            Some(event) => {
                if let Some(error) = event.downcast_ref::<ErrorEvent>() {
                    error!("event stream failed: {}", error.error);
                    break;
                }
                println!("{:#?}", event);
            }
            None => continue,
        }
    }

    client.stop_event_stream();
}
