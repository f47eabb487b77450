mod app;
mod cli;
mod config;
mod error;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use config::CliConfig;
use error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        error!(error = %err, "ble-link exited with an error");
        std::process::exit(1);
    }
}

fn setup_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "ble_link_cli=info,ble_link_core=info,ble_link_btleplug=info",
        1 => "ble_link_cli=debug,ble_link_core=debug,ble_link_btleplug=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(verbose >= 2)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => CliConfig::default_path()?,
    };
    let mut config = CliConfig::load_from_file(&config_path)?;
    if let Some(name) = &cli.name {
        config.display_name = name.clone();
    }

    match cli.command {
        Commands::Status => {
            println!("display name: {}", config.display_name);
            println!("config path:  {}", config_path.display());
            println!("auto-accept:  {}", config.auto_accept);
            Ok(())
        }
        Commands::Advertise => {
            let app = app::BleLinkApp::new(
                config.display_name.clone(),
                config.to_core_config(),
                config.auto_accept,
            )
            .await?;
            let outcome = app.communicator.start_advertising().await;
            info!(?outcome, "advertising started");
            app::wait_for_interrupt_or_timeout(None).await;
            app.communicator.destroy().await;
            Ok(())
        }
        Commands::Scan { seconds } => {
            let app = app::BleLinkApp::new(
                config.display_name.clone(),
                config.to_core_config(),
                config.auto_accept,
            )
            .await?;
            let outcome = app.communicator.start_discovery().await;
            info!(?outcome, "discovery started");
            app::wait_for_interrupt_or_timeout(seconds).await;
            for peer in app.discovered_peers().await {
                println!("{}", peer.unique_name());
            }
            app.communicator.destroy().await;
            Ok(())
        }
        Commands::Send { to, message } => {
            let app = app::BleLinkApp::new(
                config.display_name.clone(),
                config.to_core_config(),
                config.auto_accept,
            )
            .await?;
            app.communicator.start_discovery().await;
            wait_until_discovered(&app, &to).await;
            app.communicator.stop_discovery().await;

            app.connect_and_wait(&to).await?;
            let receiver = app.discovered_peers().await.into_iter().find(|p| p.unique_name() == to.as_str());
            app.send_text(receiver, &message).await?;
            info!(to = %to, "message sent");
            app.communicator.destroy().await;
            Ok(())
        }
        Commands::Interactive => run_interactive(config).await,
    }
}

/// Poll the discovered-peer registry until `name` shows up or the
/// connection's own handshake timeout would have elapsed anyway.
async fn wait_until_discovered(app: &app::BleLinkApp, name: &str) {
    for _ in 0..100 {
        if app.discovered_peers().await.iter().any(|p| p.unique_name() == name) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

async fn run_interactive(config: CliConfig) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let app = app::BleLinkApp::new(config.display_name.clone(), config.to_core_config(), config.auto_accept).await?;
    app.communicator.start_advertising().await;
    app.communicator.start_discovery().await;

    println!("ble-link interactive mode. Commands: peers | send <name> <text> | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim();
                if line == "quit" {
                    break;
                } else if line == "peers" {
                    for peer in app.discovered_peers().await {
                        println!("{}", peer.unique_name());
                    }
                } else if let Some(rest) = line.strip_prefix("send ") {
                    let Some((to, text)) = rest.split_once(' ') else {
                        println!("usage: send <name> <text>");
                        continue;
                    };
                    match app.connect_and_wait(to).await {
                        Ok(()) => {
                            let receiver = app.discovered_peers().await.into_iter().find(|p| p.unique_name() == to);
                            if let Err(err) = app.send_text(receiver, text).await {
                                println!("send failed: {err}");
                            }
                        }
                        Err(err) => println!("connect failed: {err}"),
                    }
                } else if !line.is_empty() {
                    println!("unrecognized command: {line}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    app.communicator.destroy().await;
    Ok(())
}
