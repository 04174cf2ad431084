fn main() {
    if let Err(err) = cloudaudit::cli::run() {
        cloudaudit::ui::eprintln_error(&err);
        std::process::exit(cloudaudit::exit::exit_code(&err));
    }
}
