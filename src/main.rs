//! wanrun CLI — launcher for Wan video generation.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "wanrun",
    version,
    about = "Launcher for Wan video generation — artifact resolution, capability probing, fallback-safe execution plans"
)]
struct Cli {
    #[command(flatten)]
    args: wanrun::cli::LaunchArgs,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = wanrun::cli::run(cli.args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
