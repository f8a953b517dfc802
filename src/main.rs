use clap::Parser;
use data_loader::cli::{self, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    match cli::execute(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // failures before logging starts have no subscriber to report to
            if tracing::dispatcher::has_been_set() {
                tracing::error!("{:#}", err);
            } else {
                eprintln!("error: {:#}", err);
            }
            ExitCode::FAILURE
        }
    }
}
