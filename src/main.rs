fn main() {
    if let Err(err) = whatareyoudoing_lib::run() {
        log::error!("fatal: {err:#}");
        eprintln!("whatareyoudoing: {err:#}");
        std::process::exit(1);
    }
}
