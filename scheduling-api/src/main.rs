fn main() {
    if let Err(err) = session_scheduling::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
