fn main() {
    if let Err(err) = profilevault::cli::run() {
        println!("{:#}", err);
        std::process::exit(2);
    }
}
