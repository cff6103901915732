use std::process::ExitCode;

fn main() -> ExitCode {
    match centrald::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("centrald: {error}");
            ExitCode::FAILURE
        }
    }
}
