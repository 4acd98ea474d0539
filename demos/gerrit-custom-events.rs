use std::path::PathBuf;
use std::time::Duration;

use log::error;
use serde::Deserialize;
use structopt::StructOpt;

use gerrit_client::{ErrorEvent, GerritClient, GerritEvent};

/// Newer servers emit `project-created`, which is not a built-in kind.
/// Registering it upgrades it from an `UnhandledEvent` to a typed event.
#[derive(Deserialize, Debug, Clone)]
struct ProjectCreatedEvent {
    #[serde(rename = "projectName")]
    project_name: String,
    #[serde(rename = "headName")]
    head_name: String,
}

impl GerritEvent for ProjectCreatedEvent {
    fn kind(&self) -> &str {
        "project-created"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

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
    client
        .registry()
        .register_event::<ProjectCreatedEvent>("project-created")
        .unwrap();
    client.start_event_stream();

    loop {
        match client.get_event(Some(Duration::from_secs(60))) {
            Some(event) => {
                if let Some(error) = event.downcast_ref::<ErrorEvent>() {
                    error!("event stream failed: {}", error.error);
                    break;
                }
                if let Some(created) = event.downcast_ref::<ProjectCreatedEvent>() {
                    println!(
                        "project {} created with head {}",
                        created.project_name, created.head_name
                    );
                } else {
                    println!("{:#?}", event);
                }
            }
            None => continue,
        }
    }

    client.stop_event_stream();
}
