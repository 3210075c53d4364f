use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Extensions register before the first command runs; the registry is
    // read-only afterwards.
    bosun_core::hooks::HookRegistry::register(Box::new(
        bosun_core::scanner::ScannerHook::from_env(),
    ))?;
    bosun_core::hooks::HookRegistry::seal();

    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Configuration problems are user input errors, not crashes
            if let Some(bosun_error) = err.downcast_ref::<bosun_core::errors::BosunError>() {
                if matches!(bosun_error, bosun_core::errors::BosunError::Config(_)) {
                    eprintln!("Error: {}", bosun_error);
                    std::process::exit(2);
                }
            }
            Err(err)
        }
    }
}
