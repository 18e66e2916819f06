use std::process::ExitCode;

fn main() -> ExitCode {
    xcpatch::run()
}
