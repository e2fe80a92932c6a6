use crate::features::report::request::Period;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "gsc-report",
    bin_name = "gsc-report",
    version,
    about = "Search Console query report across every property you can access"
)]
pub struct Cli {
    /// Log debug output to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the OAuth client identity (client_secret.json).
    Integration(IntegrationArgs),
    /// Sign in with Google via OAuth.
    Login(LoginArgs),
    /// Forget the local session.
    Logout(LogoutArgs),
    /// Show the stored session without contacting Google.
    Status(StatusArgs),
    /// Aggregate top queries across all properties.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct IntegrationArgs {
    #[command(subcommand)]
    pub command: IntegrationCommand,
}

#[derive(Debug, Subcommand)]
pub enum IntegrationCommand {
    /// Save the client identity and optional redirect URI.
    Set(IntegrationSetArgs),
    /// Show integration configuration status.
    Show,
    /// Clear integration configuration and session.
    Clear(IntegrationClearArgs),
}

#[derive(Debug, Args)]
pub struct IntegrationSetArgs {
    /// Path to client_secret.json downloaded from Google Cloud Console.
    #[arg(long)]
    pub client_secrets: Option<PathBuf>,
    #[arg(long)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Args)]
pub struct IntegrationClearArgs {
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Print the consent URL instead of opening a browser.
    #[arg(long)]
    pub no_browser: bool,
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub client_secrets: Option<PathBuf>,
    #[arg(long)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Args)]
pub struct LogoutArgs {
    /// Also remove the stored client identity.
    #[arg(long)]
    pub forget_client: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// First day of the range (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<NaiveDate>,
    /// Last day of the range (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    pub end: Option<NaiveDate>,
    /// Preset range ending today, in days.
    #[arg(long, value_enum, conflicts_with_all = ["start", "end"])]
    pub last: Option<Period>,
    /// Maximum rows per property (1000 to 250000).
    #[arg(long)]
    pub row_limit: Option<u32>,
    /// Properties queried at once (1 to 8).
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Write the report as CSV to this path.
    #[arg(long)]
    pub csv: Option<PathBuf>,
    /// Print the report as CSV on stdout.
    #[arg(long, conflicts_with = "json")]
    pub csv_stdout: bool,
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub client_secrets: Option<PathBuf>,
}
