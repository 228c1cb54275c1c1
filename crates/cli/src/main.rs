use std::process::ExitCode;

fn main() -> ExitCode {
    leavewell_cli::run()
}
