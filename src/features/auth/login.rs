use crate::cli::LoginArgs;
use crate::error::{AppError, AppResult};
use crate::features::auth::callback::CallbackServer;
use crate::features::auth::credentials::required_scopes;
use crate::features::auth::integration;
use crate::features::auth::models::LoginOutput;
use crate::features::auth::oauth::{self, AuthorizationFlow};
use crate::features::report::DEFAULT_TIMEOUT_SECS;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(180);

pub async fn run(args: LoginArgs) -> AppResult<LoginOutput> {
    let resolved = integration::resolve_client(args.client_secrets)?;
    let redirect_uri = integration::resolve_redirect_uri(args.redirect_uri, &resolved.config)?;

    let callback_server = CallbackServer::bind(&redirect_uri, CALLBACK_TIMEOUT).await?;

    let http = oauth::token_http_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .map_err(|err| AppError::generic(format!("Failed to build HTTP client: {err}")))?;
    let flow = AuthorizationFlow::new(resolved.config.clone(), required_scopes(), http)?;
    let authorization = flow.begin(&redirect_uri)?;

    if args.no_browser {
        println!("Open this URL to continue login:\n{}", authorization.url);
    } else if let Err(err) = open_browser(&authorization.url) {
        eprintln!(
            "Could not open browser automatically ({err}). Open this URL manually:\n{}",
            authorization.url
        );
    }

    let callback = callback_server.wait_for_code().await?;
    if callback.state != authorization.csrf_state {
        flow.reset();
        return Err(AppError::auth(
            "OAuth state mismatch. Aborting login for security.",
        ));
    }

    let record = flow.complete(&redirect_uri, &callback.code).await?;
    integration::remember_client(&resolved)?;
    integration::save_token_record(&record)?;
    debug!(state = ?flow.state(), "authorization flow finished");
    info!(client_id = %record.client_id, "signed in");

    Ok(LoginOutput {
        ok: true,
        client_id: record.client_id,
        scopes: record.scopes.into_iter().collect(),
        expires_at: record.expiry,
    })
}

fn open_browser(url: &str) -> Result<(), String> {
    let (program, args): (&str, Vec<&str>) = if cfg!(target_os = "macos") {
        ("open", vec![url])
    } else if cfg!(target_os = "windows") {
        ("cmd", vec!["/C", "start", "", url])
    } else {
        ("xdg-open", vec![url])
    };

    let status = Command::new(program)
        .args(&args)
        .status()
        .map_err(|err| err.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{program} exited with status {status}"))
    }
}
