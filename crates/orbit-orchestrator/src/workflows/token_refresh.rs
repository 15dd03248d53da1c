//! Per-installation token refresh loop. One run per installation
//! (`token-refresh:<installation_id>`, RejectDuplicate); the loop sleeps
//! until fifteen minutes before expiry, refreshes, and goes around again
//! until the installation disappears or deactivates.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use orbit_core::workflow::{OrbitWorkflow, WorkflowContext, WorkflowInfo};
use orbit_core::Result;

use crate::activities::token::{
    LoadInstallationInput, LoadedInstallation, RefreshTokenInput, RefreshedToken,
};

pub const FAMILY: &str = "token-refresh";

/// Refresh this far before expiry.
const REFRESH_LEAD_MINUTES: i64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshInput {
    pub installation_doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshOutput {
    pub refreshes: u32,
}

pub struct GitHubTokenRefreshWorkflow;

impl OrbitWorkflow for GitHubTokenRefreshWorkflow {
    type Input = TokenRefreshInput;
    type Output = TokenRefreshOutput;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            family: FAMILY,
            execution_timeout: Duration::from_secs(30 * 24 * 3600),
            ..WorkflowInfo::default()
        }
    }

    fn execute(
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Output>> + Send + '_>> {
        Box::pin(async move {
            let mut refreshes = 0u32;
            loop {
                let loaded: LoadedInstallation = ctx
                    .activity(
                        "token.load_installation",
                        LoadInstallationInput {
                            installation_doc_id: input.installation_doc_id.clone(),
                        },
                    )
                    .run()
                    .await?;

                let Some(installation) = loaded.record else {
                    break;
                };
                if !installation.is_active() {
                    break;
                }

                if let Some(expires_at) = installation.token_expires_at {
                    let refresh_at = expires_at - ChronoDuration::minutes(REFRESH_LEAD_MINUTES);
                    if refresh_at > loaded.now {
                        let wait = (refresh_at - loaded.now)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        ctx.sleep(wait).await?;
                    }
                }

                let _refreshed: RefreshedToken = ctx
                    .activity(
                        "token.refresh",
                        RefreshTokenInput {
                            installation_doc_id: input.installation_doc_id.clone(),
                        },
                    )
                    .run()
                    .await?;
                refreshes += 1;
            }
            Ok(TokenRefreshOutput { refreshes })
        })
    }
}
