use std::path::PathBuf;

use log::error;
use structopt::StructOpt;

use gerrit_client::GerritClient;

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
    query: String,
}

fn main() {
    let args = Args::from_args();
    stderrlog::new()
        .module(module_path!())
        .module("gerrit_client")
        .timestamp(stderrlog::Timestamp::Second)
        .verbosity(2)
        .init()
        .unwrap();

    let mut client = GerritClient::new(
        format!("{}:{}", args.hostname, args.port),
        args.username,
        args.private_key_path,
    );

    match client.gerrit_version() {
        Ok(version) => println!("# gerrit version {}", version),
        Err(err) => {
            error!("could not query gerrit version: {}", err);
            std::process::exit(1);
        }
    }

    match client.query(&args.query) {
        Ok(changes) => {
            for change in changes {
                println!("{:#?}", change);
            }
        }
        Err(err) => {
            error!("error running query: {}", err);
            std::process::exit(1);
        }
    }
}
