#![forbid(unsafe_code)]

//! Binary entrypoint for the fileops CLI.

fn main() {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            std::process::exit(3);
        }
    };
    let exit_code = runtime.block_on(fileops_cli::run());
    std::process::exit(exit_code);
}
