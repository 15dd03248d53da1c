//! Installation and token activities.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbit_clients::payload::{collections, get_as};
use orbit_core::activity::ActivityRegistry;
use orbit_core::ErrorKind;

use crate::deps::WorkerDeps;
use crate::records::InstallationRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindInstallationInput {
    pub workspace_id: String,
    #[serde(default)]
    pub override_installation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadInstallationInput {
    pub installation_doc_id: String,
}

/// Installation snapshot plus the wall clock observed by the activity, so
/// workflow code can compute sleep durations deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedInstallation {
    pub record: Option<InstallationRecord>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptTokenInput {
    pub installation: InstallationRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenInput {
    pub installation_doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedToken {
    pub token_expires_at: DateTime<Utc>,
}

pub fn register(reg: &mut ActivityRegistry, deps: &Arc<WorkerDeps>) {
    let d = deps.clone();
    reg.register("token.find_installation", move |_ctx, input: FindInstallationInput| {
        let d = d.clone();
        async move {
            d.tokens
                .find_installation_for_workspace(
                    &input.workspace_id,
                    input.override_installation.as_deref(),
                )
                .await
        }
    });

    let d = deps.clone();
    reg.register("token.load_installation", move |_ctx, input: LoadInstallationInput| {
        let d = d.clone();
        async move {
            let record = match get_as::<InstallationRecord>(
                d.cms.as_ref(),
                collections::INSTALLATIONS,
                &input.installation_doc_id,
            )
            .await
            {
                Ok(record) => Some(record),
                Err(e) if e.kind == ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            };
            Ok(LoadedInstallation {
                record,
                now: Utc::now(),
            })
        }
    });

    let d = deps.clone();
    reg.register("token.decrypt", move |_ctx, input: DecryptTokenInput| {
        let d = d.clone();
        async move {
            let token = d.tokens.installation_token(&input.installation, Utc::now())?;
            Ok(TokenGrant { token })
        }
    });

    let d = deps.clone();
    reg.register("token.refresh", move |_ctx, input: RefreshTokenInput| {
        let d = d.clone();
        async move {
            let record: InstallationRecord = get_as(
                d.cms.as_ref(),
                collections::INSTALLATIONS,
                &input.installation_doc_id,
            )
            .await?;
            let token_expires_at = d.tokens.mint_and_store(&record).await?;
            Ok(RefreshedToken { token_expires_at })
        }
    });
}
