use std::process::ExitCode;

fn main() -> ExitCode {
    match sheet_import::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
