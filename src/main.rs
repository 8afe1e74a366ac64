use std::process::ExitCode;
use std::time::{Duration, UNIX_EPOCH};

use clap::Parser;
use log::{info, warn};

use jorik_installer::config::{Cli, Command, Options};
use jorik_installer::runtime_dep::DependencyOutcome;
use jorik_installer::{FetchError, FetchResult};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let run = run(cli.command.unwrap_or(Command::Install), cli.options);

    // Dropping `run` on Ctrl-C releases the scratch workspace before exit.
    let result = tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", failure_line(&e));
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(command: Command, options: Options) -> FetchResult<()> {
    let api = options.api();
    match command {
        Command::Install => {
            let triple = options.target_triple();
            let target = options.install_target()?;
            let repo = api.repo(&options.owner, &options.repo);
            let version = match &options.tag {
                Some(tag) => repo.version(tag),
                None => repo.latest(),
            };

            let report = version.install(&triple, &target).await?;
            info!(
                "jorik {} installed to {}{}",
                report.tag,
                report.outcome.destination.display(),
                if report.outcome.elevated { " (elevated)" } else { "" }
            );
            if let Some(DependencyOutcome::Warning(reason)) = &report.dependency {
                warn!("jorik is installed, but its runtime dependency is not: {reason}");
            }
        }
        Command::Status => match api.installed()? {
            Some(receipt) => {
                let when = describe_age(receipt.installed_at);
                println!("repo:        {}", receipt.repo);
                println!("release:     {}", receipt.tag);
                println!("asset:       {}", receipt.asset);
                println!("destination: {}", receipt.destination.display());
                if let Some(entry) = &receipt.path_entry {
                    println!("path entry:  {entry}");
                }
                println!("installed:   {when}");
            }
            None => println!("jorik is not installed"),
        },
        Command::Uninstall => {
            let receipt = api.uninstall().await?;
            info!("uninstalled jorik {} from {}", receipt.tag, receipt.destination.display());
        }
    }
    Ok(())
}

fn failure_line(e: &FetchError) -> String {
    format!("error: {e}")
}

fn describe_age(secs: u64) -> String {
    let elapsed = UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .and_then(|t| t.elapsed().ok())
        .map(|d| d.as_secs());
    match elapsed {
        Some(s) if s < 120 => "just now".to_owned(),
        Some(s) if s < 7200 => format!("{} minutes ago", s / 60),
        Some(s) if s < 172_800 => format!("{} hours ago", s / 3600),
        Some(s) => format!("{} days ago", s / 86_400),
        None => format!("at unix time {secs}"),
    }
}
