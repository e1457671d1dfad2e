use std::process::ExitCode;

fn main() -> ExitCode {
    rollwise_cli::run()
}
