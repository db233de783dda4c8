fn main() {
    std::process::exit(jsesi::cli::run());
}
