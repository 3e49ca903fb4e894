//! presenced: presence heartbeat driver binary.

use clap::Parser;
use presence_runtime::FileSlot;
use presence_runtime::slot::resolve_from;

mod cli;
mod cmd_run;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Run(cli::RunOpts::default()));
    let identity_path = args
        .identity_file
        .unwrap_or_else(cli::default_identity_path);

    match command {
        cli::Command::Run(opts) => {
            let filter = std::env::var("PRESENCE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .with_writer(std::io::stderr)
                .init();

            cmd_run::cmd_run(&opts, &identity_path).await?;
        }
        cli::Command::Resolve => {
            let slot = FileSlot::new(&identity_path);
            match resolve_from(&slot) {
                Some(user) => println!("{user}"),
                None => {
                    eprintln!("no identity in {}", identity_path.display());
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
