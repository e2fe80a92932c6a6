use crate::error::{AppError, AppResult};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::debug;
use url::Url;

const MAX_REQUEST_LINE: usize = 8192;

const SUCCESS_BODY: &str = "<html><body><h1>Search Console sign-in complete</h1><p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_BODY: &str = "<html><body><h1>Search Console sign-in failed</h1><p>Return to the terminal and run the login again.</p></body></html>";

#[derive(Debug)]
pub struct CallbackPayload {
    pub code: String,
    pub state: String,
}

/// One-shot loopback listener that receives the authorization redirect.
pub struct CallbackServer {
    listener: TcpListener,
    expected_path: String,
    timeout: Duration,
}

impl CallbackServer {
    pub async fn bind(redirect_uri: &str, timeout: Duration) -> AppResult<Self> {
        let parsed = Url::parse(redirect_uri)
            .map_err(|err| AppError::invalid_input(format!("Invalid redirect_uri: {err}")))?;

        if parsed.scheme() != "http" {
            return Err(AppError::invalid_input(
                "redirect_uri for CLI login must use http loopback (for example http://127.0.0.1:45455/callback).",
            ));
        }

        match parsed.host_str() {
            Some("127.0.0.1") | Some("localhost") => {}
            _ => {
                return Err(AppError::invalid_input(
                    "redirect_uri host must be localhost or 127.0.0.1 for CLI login.",
                ));
            }
        }

        let port = parsed.port().ok_or_else(|| {
            AppError::invalid_input(
                "redirect_uri must include an explicit port for local callback handling.",
            )
        })?;

        let bind_addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&bind_addr).await.map_err(|err| {
            AppError::auth(format!(
                "Failed to bind callback server on {bind_addr}: {err}"
            ))
        })?;

        Ok(Self {
            listener,
            expected_path: parsed.path().to_string(),
            timeout,
        })
    }

    /// Serves the loopback port until the redirect for the expected path
    /// arrives. Other requests (favicon, preconnects) get a 404 and the wait
    /// continues.
    pub async fn wait_for_code(self) -> AppResult<CallbackPayload> {
        let deadline = Instant::now() + self.timeout;
        let mut pending = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        pending.spawn(read_request_line(stream));
                    }
                    Err(err) => debug!(error = %err, "failed to accept callback connection"),
                },
                Some(joined) = pending.join_next() => {
                    let Ok(Ok((mut stream, request_line))) = joined else {
                        debug!("dropping unreadable callback connection");
                        continue;
                    };
                    let Some(query) = match_callback(&request_line, &self.expected_path) else {
                        debug!(request = %request_line, "ignoring unrelated request on callback port");
                        let _ = write_response(&mut stream, "404 Not Found", "").await;
                        continue;
                    };

                    let outcome = parse_callback_query(query);
                    let (status, body) = match &outcome {
                        Ok(_) => ("200 OK", SUCCESS_BODY),
                        Err(_) => ("400 Bad Request", FAILURE_BODY),
                    };
                    write_response(&mut stream, status, body).await?;
                    return outcome;
                }
                _ = sleep_until(deadline) => {
                    return Err(AppError::auth(
                        "Timed out waiting for the OAuth callback. Run login again.",
                    ));
                }
            }
        }
    }
}

/// Reads until the end of the HTTP request line, across as many reads as it takes.
async fn read_request_line(mut stream: TcpStream) -> AppResult<(TcpStream, String)> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0_u8; 1024];

    loop {
        if let Some(end) = buffer.windows(2).position(|pair| pair == b"\r\n") {
            let line = String::from_utf8_lossy(&buffer[..end]).into_owned();
            return Ok((stream, line));
        }
        if buffer.len() >= MAX_REQUEST_LINE {
            return Err(AppError::auth("Callback request line is too long."));
        }

        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| AppError::auth(format!("Failed to read callback request: {err}")))?;
        if read == 0 {
            return Err(AppError::auth("Callback connection closed before the request line."));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Returns the query string when the request line is a GET for `expected_path`.
fn match_callback<'a>(request_line: &'a str, expected_path: &str) -> Option<&'a str> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    (path == expected_path).then_some(query)
}

fn parse_callback_query(query: &str) -> AppResult<CallbackPayload> {
    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AppError::auth(format!(
            "Google did not grant access ({error})."
        )));
    }

    Ok(CallbackPayload {
        code: code.ok_or_else(|| AppError::auth("OAuth callback did not include code parameter."))?,
        state: state
            .ok_or_else(|| AppError::auth("OAuth callback did not include state parameter."))?,
    })
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> AppResult<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|err| AppError::auth(format!("Failed to write callback response: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| AppError::auth(format!("Failed to flush callback response: {err}")))
}
