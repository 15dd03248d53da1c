//! Installation-token lifecycle: deterministic installation selection,
//! freshness-checked decryption, and refresh-and-store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use orbit_clients::payload::{collections, find_as, Cms, Filter};
use orbit_clients::GithubApi;
use orbit_core::{OrbitError, Result};

use super::crypto::TokenCipher;
use crate::records::InstallationRecord;

/// Tokens within this skew of expiry are treated as expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;

pub struct TokenService {
    cms: Arc<dyn Cms>,
    github: Arc<dyn GithubApi>,
    cipher: Arc<TokenCipher>,
}

impl TokenService {
    pub fn new(cms: Arc<dyn Cms>, github: Arc<dyn GithubApi>, cipher: Arc<TokenCipher>) -> Self {
        Self { cms, github, cipher }
    }

    /// Pick the installation for a workspace. With no override the
    /// lexicographically-first active installation wins, which keeps the
    /// choice stable under replay.
    pub async fn find_installation_for_workspace(
        &self,
        workspace_id: &str,
        override_id: Option<&str>,
    ) -> Result<InstallationRecord> {
        let filter = Filter::new()
            .eq("workspace", workspace_id)
            .eq("status", "active")
            .sort("id");
        let mut installations: Vec<InstallationRecord> =
            find_as(self.cms.as_ref(), collections::INSTALLATIONS, &filter).await?;
        installations.sort_by(|a, b| a.id.cmp(&b.id));

        if installations.is_empty() {
            return Err(OrbitError::not_found(format!(
                "workspace {workspace_id} has no active installation"
            ))
            .with_code("NO_INSTALLATION"));
        }

        match override_id {
            Some(wanted) => installations
                .into_iter()
                .find(|i| i.id == wanted)
                .ok_or_else(|| {
                    OrbitError::permission_denied(format!(
                        "installation {wanted} is not usable for workspace {workspace_id}"
                    ))
                    .with_code("OVERRIDE_NOT_ALLOWED")
                }),
            None => Ok(installations.remove(0)),
        }
    }

    /// Decrypt a stored token, refusing anything within the expiry skew.
    pub fn installation_token(
        &self,
        installation: &InstallationRecord,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let expires_at = installation.token_expires_at.ok_or_else(|| {
            OrbitError::token_expired(format!(
                "installation {} has no stored token",
                installation.id
            ))
        })?;
        if expires_at <= now + Duration::seconds(EXPIRY_SKEW_SECONDS) {
            return Err(OrbitError::token_expired(format!(
                "installation {} token expires at {expires_at}",
                installation.id
            )));
        }
        let sealed = installation.encrypted_token.as_deref().ok_or_else(|| {
            OrbitError::token_expired(format!(
                "installation {} has no stored token",
                installation.id
            ))
        })?;
        self.cipher.open(sealed)
    }

    /// Mint a fresh App-installation token, seal it, and store it back.
    /// Returns the new expiry.
    pub async fn mint_and_store(
        &self,
        installation: &InstallationRecord,
    ) -> Result<DateTime<Utc>> {
        let minted = self
            .github
            .create_installation_token(installation.installation_id)
            .await?;
        let sealed = self.cipher.seal(&minted.token)?;

        self.cms
            .patch(
                collections::INSTALLATIONS,
                &installation.id,
                serde_json::json!({
                    "encryptedToken": sealed,
                    "tokenExpiresAt": minted.expires_at,
                }),
            )
            .await?;
        self.cms
            .store_rotated_token(serde_json::json!({
                "installation": installation.id,
                "installationId": installation.installation_id,
                "tokenExpiresAt": minted.expires_at,
            }))
            .await?;
        Ok(minted.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use orbit_clients::testing::{InMemoryCms, MockGithub};
    use orbit_core::settings::EncryptionKey;

    use super::*;

    fn service() -> (TokenService, Arc<InMemoryCms>, Arc<TokenCipher>) {
        let cms = Arc::new(InMemoryCms::new());
        let cipher = Arc::new(TokenCipher::new(&EncryptionKey([3u8; 32])).unwrap());
        let service = TokenService::new(cms.clone(), Arc::new(MockGithub::new()), cipher.clone());
        (service, cms, cipher)
    }

    fn installation(id: &str, workspace: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "installationId": 100,
            "accountLogin": "acme",
            "workspace": workspace,
            "status": status,
        })
    }

    #[tokio::test]
    async fn picks_lexicographically_first_active() {
        let (service, cms, _) = service();
        cms.insert("github-installations", installation("inst-b", "ws1", "active"));
        cms.insert("github-installations", installation("inst-a", "ws1", "active"));
        cms.insert("github-installations", installation("inst-0", "ws1", "suspended"));

        let picked = service
            .find_installation_for_workspace("ws1", None)
            .await
            .unwrap();
        assert_eq!(picked.id, "inst-a");
    }

    #[tokio::test]
    async fn no_installation_is_coded() {
        let (service, _, _) = service();
        let err = service
            .find_installation_for_workspace("ws1", None)
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "NO_INSTALLATION");
    }

    #[tokio::test]
    async fn override_must_be_in_set() {
        let (service, cms, _) = service();
        cms.insert("github-installations", installation("inst-a", "ws1", "active"));

        let ok = service
            .find_installation_for_workspace("ws1", Some("inst-a"))
            .await
            .unwrap();
        assert_eq!(ok.id, "inst-a");

        let err = service
            .find_installation_for_workspace("ws1", Some("inst-z"))
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "OVERRIDE_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn token_freshness_skew_is_enforced() {
        let (service, _, cipher) = service();
        let now = Utc::now();
        let mut record: InstallationRecord =
            serde_json::from_value(installation("inst-a", "ws1", "active")).unwrap();
        record.encrypted_token = Some(cipher.seal("ghs_live").unwrap());

        record.token_expires_at = Some(now + Duration::seconds(59));
        assert_eq!(
            service.installation_token(&record, now).unwrap_err().code_str(),
            "TOKEN_EXPIRED"
        );

        record.token_expires_at = Some(now + Duration::seconds(120));
        assert_eq!(service.installation_token(&record, now).unwrap(), "ghs_live");
    }

    #[tokio::test]
    async fn mint_and_store_rotates_cms_state() {
        let (service, cms, cipher) = service();
        let id = cms.insert("github-installations", installation("inst-a", "ws1", "active"));
        let record: InstallationRecord =
            serde_json::from_value(cms.document("github-installations", &id).unwrap()).unwrap();

        let expires = service.mint_and_store(&record).await.unwrap();
        assert!(expires > Utc::now());

        let stored = cms.document("github-installations", &id).unwrap();
        let sealed = stored["encryptedToken"].as_str().unwrap();
        assert!(cipher.open(sealed).unwrap().starts_with("ghs_mock_"));
        assert_eq!(cms.rotated_tokens().len(), 1);
    }
}
