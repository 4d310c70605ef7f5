fn main() {
    if let Err(err) = winkcharge_lib::run() {
        log::error!("{err:?}");
        std::process::exit(1);
    }
}
