//! Pre-creation identity checks against an external directory.
//!
//! Verification gates user creation at the API edge only; access decisions
//! never consult it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Answer to "is this id known to the external directory?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub exists: bool,
    pub message: String,
    /// Display name when the id is already known locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The id was found in the local store without asking the directory.
    #[serde(default)]
    pub local: bool,
    /// The directory was unreachable and the id was accepted anyway.
    #[serde(default)]
    pub offline: bool,
}

impl Verification {
    /// Verified by the directory.
    pub fn found(message: impl Into<String>) -> Self {
        Self {
            exists: true,
            message: message.into(),
            name: None,
            local: false,
            offline: false,
        }
    }

    /// Rejected by the directory.
    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            exists: false,
            ..Self::found(message)
        }
    }

    /// Accepted without a directory answer.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::found("Offline mode - user accepted")
        }
    }

    /// Already present in the local store.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            local: true,
            ..Self::found("User already exists locally")
        }
    }
}

/// External identity directory.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Checks whether the directory knows `user_id`. Never fails; transport
    /// problems are folded into the returned [`Verification`].
    async fn verify(&self, user_id: &UserId) -> Verification;
}

/// Maps the directory's `msg` field to a verification.
pub(crate) fn classify(message: &str) -> Verification {
    if message.contains("Username found") {
        Verification::found("Employee verified successfully")
    } else if message.contains("Username Available") {
        Verification::missing(
            "Employee not found in central server. Please register first at the main portal.",
        )
    } else {
        Verification::missing(format!("Verification failed: {message}"))
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpIdentityVerifier;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;
    use tracing::{error, info, warn};

    use super::{IdentityVerifier, Verification, classify};
    use crate::error::{Error, Result};
    use crate::types::UserId;

    #[derive(Debug, Deserialize)]
    struct DirectoryResponse {
        #[serde(default)]
        msg: String,
    }

    /// Verifier posting `api`, `user` and `uname` headers to a validation URL.
    #[derive(Clone)]
    pub struct HttpIdentityVerifier {
        client: reqwest::Client,
        url: String,
        api_user: String,
        api_key: String,
    }

    impl std::fmt::Debug for HttpIdentityVerifier {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HttpIdentityVerifier")
                .field("url", &self.url)
                .field("api_user", &self.api_user)
                .field("api_key", &"<redacted>")
                .finish()
        }
    }

    impl HttpIdentityVerifier {
        /// Creates a verifier.
        ///
        /// # Errors
        ///
        /// Returns `Error::InvalidConfig` when the URL is empty or the HTTP
        /// client cannot be built.
        pub fn new(
            url: impl Into<String>,
            api_user: impl Into<String>,
            api_key: impl Into<String>,
            timeout: Duration,
        ) -> Result<Self> {
            let url = url.into();
            if url.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "identity url must not be empty".to_string(),
                ));
            }
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| Error::InvalidConfig(format!("identity http client: {err}")))?;
            Ok(Self {
                client,
                url,
                api_user: api_user.into(),
                api_key: api_key.into(),
            })
        }
    }

    #[async_trait]
    impl IdentityVerifier for HttpIdentityVerifier {
        async fn verify(&self, user_id: &UserId) -> Verification {
            info!(user = %user_id, "verifying employee id");
            let response = self
                .client
                .post(&self.url)
                .header("api", &self.api_key)
                .header("user", &self.api_user)
                .header("uname", user_id.as_str())
                .send()
                .await;
            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "identity directory unreachable, accepting offline");
                    return Verification::offline();
                }
            };
            if !response.status().is_success() {
                error!(status = %response.status(), "identity directory returned an error");
                return Verification::missing(format!(
                    "Central server verification failed (Status {})",
                    response.status().as_u16()
                ));
            }
            match response.json::<DirectoryResponse>().await {
                Ok(body) => {
                    let verification = classify(&body.msg);
                    if !verification.exists {
                        warn!(user = %user_id, msg = %body.msg, "identity directory rejected id");
                    }
                    verification
                }
                Err(err) => {
                    warn!(error = %err, "unreadable identity directory response");
                    Verification::missing(format!("Verification failed: {err}"))
                }
            }
        }
    }

}
