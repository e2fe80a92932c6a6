mod cli;
mod error;
mod features;
mod search_console;
mod ui;

use clap::Parser;
use colored::Colorize;
use dialoguer::Input;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    Cli, Command, IntegrationArgs, IntegrationClearArgs, IntegrationCommand, IntegrationSetArgs,
    LoginArgs, LogoutArgs, ReportArgs, StatusArgs,
};
use crate::error::{AppError, AppResult};
use crate::features::auth::client_config::ClientConfigSource;
use crate::features::auth::credentials::Validity;
use crate::features::auth::integration::{self, DEFAULT_REDIRECT_URI};
use crate::features::auth::{login, logout, status};
use crate::features::report::{self, export};
use crate::ui::{confirm, is_interactive_terminal, prompt_theme};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", format!("Error: {}", err.message).red());
            err.code
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,gsc_report={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> AppResult<()> {
    match cli.command {
        Command::Integration(args) => handle_integration(args),
        Command::Login(args) => handle_login(args).await,
        Command::Logout(args) => handle_logout(args),
        Command::Status(args) => handle_status(args),
        Command::Report(args) => handle_report(args).await,
    }
}

fn handle_integration(args: IntegrationArgs) -> AppResult<()> {
    match args.command {
        IntegrationCommand::Set(args) => handle_integration_set(args),
        IntegrationCommand::Show => handle_integration_show(),
        IntegrationCommand::Clear(args) => handle_integration_clear(args),
    }
}

fn handle_integration_set(args: IntegrationSetArgs) -> AppResult<()> {
    let (client_secrets, redirect_uri) = resolve_integration_set_values(args)?;
    integration::print_secret_store_location()?;
    let config = integration::set_integration(ClientConfigSource::File(client_secrets), redirect_uri)?;
    println!(
        "{} {}",
        "Integration saved for client".green(),
        config.client_id
    );
    Ok(())
}

fn handle_integration_show() -> AppResult<()> {
    integration::print_secret_store_location()?;
    let status = integration::show_integration()?;

    println!(
        "client_secret.json: {}",
        if status.has_client_config {
            "configured"
        } else {
            "missing"
        }
    );
    println!(
        "redirect_uri: {}",
        if status.has_redirect_uri {
            "configured"
        } else {
            "default"
        }
    );

    if let Some(client_id) = status.client_id {
        println!("client_id (redacted): {client_id}");
    }
    if let Some(redirect_uri) = status.redirect_uri {
        println!("redirect_uri value: {redirect_uri}");
    }

    Ok(())
}

fn handle_integration_clear(args: IntegrationClearArgs) -> AppResult<()> {
    integration::print_secret_store_location()?;
    if !args.force && !confirm("Clear the client identity and local session?")? {
        println!("Cancelled.");
        return Ok(());
    }

    integration::clear_integration_and_session()?;
    println!("{}", "Integration and session cleared.".green());
    Ok(())
}

async fn handle_login(args: LoginArgs) -> AppResult<()> {
    integration::print_secret_store_location()?;
    let json_output = args.json;
    let output = login::run(args).await?;

    if json_output {
        return print_json(&output);
    }

    let expiry = output
        .expires_at
        .map(|at| format!(" (access token valid until {at})"))
        .unwrap_or_default();
    println!(
        "{} {}{}",
        "Signed in with client".green(),
        output.client_id,
        expiry.bright_black()
    );
    Ok(())
}

fn handle_logout(args: LogoutArgs) -> AppResult<()> {
    integration::print_secret_store_location()?;
    let json_output = args.json;
    let output = logout::run(args)?;

    if json_output {
        return print_json(&output);
    }

    if output.forgot_client {
        println!("{}", "Signed out and forgot the client identity.".green());
    } else {
        println!("{}", "Signed out of the local session.".green());
    }
    Ok(())
}

fn handle_status(args: StatusArgs) -> AppResult<()> {
    let output = status::run()?;

    if args.json {
        return print_json(&output);
    }

    if !output.signed_in {
        println!("Not signed in. Run `gsc-report login`.");
        return Ok(());
    }

    let validity = match output.validity {
        Some(Validity::Valid) => "valid".green(),
        Some(Validity::Expired) => "expired (will refresh on next report)".yellow(),
        Some(Validity::Invalid) | None => "invalid (sign in again)".red(),
    };
    println!("session: {validity}");
    if let Some(client_id) = output.client_id {
        println!("client_id: {client_id}");
    }
    println!("scopes: {}", output.scopes.join(" "));
    if let Some(expires_at) = output.expires_at {
        println!("access token expires: {expires_at}");
    }
    println!(
        "refresh token: {}",
        if output.has_refresh_token {
            "stored"
        } else {
            "missing"
        }
    );
    Ok(())
}

async fn handle_report(args: ReportArgs) -> AppResult<()> {
    integration::print_secret_store_location()?;
    let json_output = args.json;
    let csv_stdout = args.csv_stdout;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    let result = report::run(args, cancel).await;
    watcher.abort();
    let output = result?;

    if json_output {
        return print_json(&output);
    }

    if csv_stdout {
        print!("{}", export::to_csv_string(&output.report)?);
    } else {
        println!(
            "{}",
            format!(
                "Top queries {} to {}",
                output.request.start(),
                output.request.end()
            )
            .bold()
        );
        ui::print_report(&output.report);
    }

    if let Some(path) = output.csv_path {
        eprintln!("{} {path}", "CSV written to".green());
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!(
            "{}",
            "Cancelling: waiting for in-flight property queries to finish.".yellow()
        );
        cancel.cancel();
    }
}

fn print_json<T: Serialize>(output: &T) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(output)
        .map_err(|err| AppError::generic(format!("Failed to render JSON output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn resolve_integration_set_values(
    args: IntegrationSetArgs,
) -> AppResult<(PathBuf, Option<String>)> {
    let redirect_uri = normalize_optional(args.redirect_uri);
    if let Some(path) = args.client_secrets {
        return Ok((path, redirect_uri));
    }

    if !is_interactive_terminal() {
        return Err(AppError::invalid_input(
            "Missing required argument --client-secrets. Provide it in non-interactive mode.",
        ));
    }

    let path = prompt_visible_input("Path to client_secret.json", None)?;
    let redirect_uri = match redirect_uri {
        Some(value) => Some(value),
        None => {
            let defaults = integration::integration_defaults()?;
            let default_redirect = defaults
                .redirect_uri
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
            Some(prompt_visible_input(
                "Redirect URI",
                Some(default_redirect.as_str()),
            )?)
        }
    };

    Ok((PathBuf::from(path), redirect_uri))
}

fn prompt_visible_input(prompt: &str, default: Option<&str>) -> AppResult<String> {
    let theme = prompt_theme();
    let mut input = Input::<String>::with_theme(&theme).with_prompt(prompt);
    if let Some(value) = default {
        input = input.default(value.to_string());
    }

    input
        .interact_text()
        .map(|value| value.trim().to_string())
        .map_err(|err| AppError::invalid_input(format!("Failed to read {prompt}: {err}")))
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}
