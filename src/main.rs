fn main() {
    if let Err(err) = clarityhub_lib::run() {
        eprintln!("clarityhub: {err:#}");
        std::process::exit(1);
    }
}
