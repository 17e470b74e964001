use std::env;
use std::path::Path;
use std::process::ExitCode;

use tokio_stream::wrappers::ReceiverStream;
use topup_core::Settings;
use topup_core::csv::{read_events, write_accounts};
use topup_core::replay::Replay;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(settings_path), Some(events_path)) = (args.next(), args.next()) else {
        eprintln!("usage: topup-core <settings.toml> <events.csv>");
        return ExitCode::FAILURE;
    };

    if !events_path.ends_with(".csv") {
        warn!(path = events_path, "events file seems to not be a csv file");
    }

    let settings = match Settings::load(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!(path = settings_path, "{e}");
            return ExitCode::FAILURE;
        }
    };

    let events = match read_events(Path::new(&events_path)) {
        Ok(events) => events,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut replay = Replay::new(settings);
    let (event_sender, event_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in events {
            match result {
                Ok(event) => {
                    if event_sender.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    replay.run(ReceiverStream::new(event_receiver)).await;

    if let Err(e) = write_accounts(&replay.accounts()) {
        error!("failed to write accounts: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
