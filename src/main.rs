fn main() {
    if let Err(err) = tarteel_sync_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
