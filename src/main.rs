fn main() {
    if let Err(e) = crmwatch_lib::run() {
        log::error!("{}", e);
        eprintln!("crmwatch: {}", e);
        std::process::exit(1);
    }
}
