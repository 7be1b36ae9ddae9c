fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Exit codes: 0 ready, 1 bootstrap failed, 2 usage/configuration error.
    let code = couch_bootstrap::run_cli(args);
    std::process::exit(code);
}
