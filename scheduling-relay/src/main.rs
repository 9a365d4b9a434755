fn main() {
    if let Err(err) = session_scheduling::app::run_relay() {
        eprintln!("relay startup failed: {err}");
        std::process::exit(1);
    }
}
