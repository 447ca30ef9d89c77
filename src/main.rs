fn main() {
    #[cfg(feature = "cli")]
    bootlink::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("bootlink: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
