fn main() {
    if let Err(err) = session_scheduling::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
