use crate::error::AppResult;
use crate::features::auth::credentials::{self, TokenRecord};
use crate::features::auth::integration;
use crate::features::auth::models::StatusOutput;

/// Reports the stored session without touching the network.
pub fn run() -> AppResult<StatusOutput> {
    Ok(describe(integration::load_token_record()?.as_ref()))
}

fn describe(record: Option<&TokenRecord>) -> StatusOutput {
    let Some(record) = record else {
        return StatusOutput {
            ok: true,
            signed_in: false,
            validity: None,
            client_id: None,
            scopes: Vec::new(),
            expires_at: None,
            has_refresh_token: false,
        };
    };

    StatusOutput {
        ok: true,
        signed_in: true,
        validity: Some(credentials::validate(record)),
        client_id: Some(record.client_id.clone()),
        scopes: record.scopes.iter().cloned().collect(),
        expires_at: record.expiry,
        has_refresh_token: record.has_refresh_token(),
    }
}
