// src/pool/auth.rs

//! On-demand exchange of username/password for a bearer token, cached until
//! invalidated (e.g. on `InvalidAuthToken`).

use std::sync::Arc;

use tokio::sync::Mutex;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::ClientError;
use crate::pb::AuthenticateRequest;
use crate::pool::host::{Host, ServiceKind};

const TOKEN_METADATA_KEY: &str = "token";

enum AuthState {
    Unconfigured,
    Holding(MetadataValue<Ascii>),
}

/// Exchanges `username`/`password` for a bearer token against any configured host,
/// caching the token metadata until `invalidate()` is called. All concurrent callers
/// that observe no cached token serialize on the same acquisition by blocking on the
/// internal mutex, which acts as this type's "shared in-flight future".
pub struct Authenticator {
    config: Option<AuthConfig>,
    state: Mutex<AuthState>,
}

impl Authenticator {
    pub fn new(config: Option<AuthConfig>) -> Self {
        Authenticator { config, state: Mutex::new(AuthState::Unconfigured) }
    }

    /// Returns the metadata to attach to an outgoing call: empty if no credentials are
    /// configured, otherwise the cached bearer token, acquiring one first if needed.
    pub async fn get_metadata(&self, hosts: &[Arc<Host>]) -> Result<MetadataMap, ClientError> {
        let Some(config) = &self.config else {
            return Ok(MetadataMap::new());
        };

        let mut state = self.state.lock().await;
        if let AuthState::Holding(token) = &*state {
            let mut metadata = MetadataMap::new();
            metadata.insert(TOKEN_METADATA_KEY, token.clone());
            return Ok(metadata);
        }

        debug!("acquiring auth token");
        let mut last_err = None;
        for host in hosts {
            match authenticate(host, config).await {
                Ok(token_str) => {
                    let token: MetadataValue<Ascii> = token_str
                        .parse()
                        .map_err(|_| ClientError::AuthenticationFailed)?;
                    *state = AuthState::Holding(token.clone());
                    info!("auth token acquired");
                    let mut metadata = MetadataMap::new();
                    metadata.insert(TOKEN_METADATA_KEY, token);
                    return Ok(metadata);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ClientError::AuthenticationFailed))
    }

    /// Clears the cached token; the next `get_metadata` call re-acquires.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = AuthState::Unconfigured;
        info!("auth token invalidated");
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}

async fn authenticate(host: &Host, config: &AuthConfig) -> Result<String, ClientError> {
    let client = host.client_for(ServiceKind::Auth).await?.into_auth();
    let mut client = client;
    let request = AuthenticateRequest {
        name: config.username.clone(),
        password: config.password.clone(),
    };
    let response = client.authenticate(request).await.map_err(ClientError::classify)?;
    Ok(response.into_inner().token)
}
