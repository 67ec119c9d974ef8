use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::app::ports::{
    AssumeRolePort, AssumeRoleRequest, FindingsPage, IssuedCredentials, ListFindingsRequest, ProviderApiPort,
};
use crate::common::error::{CredentialError, ProviderError, Result};
use crate::config::{BrokerConfig, ProviderConfig};
use crate::credentials::lease::CredentialLease;
use crate::domain::SourceType;

const ACCESS_KEY_HEADER: &str = "x-fi-access-key-id";
const SECRET_HEADER: &str = "x-fi-secret-access-key";
const SESSION_TOKEN_HEADER: &str = "x-fi-session-token";

fn build_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("finding_ingest/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Map a gateway status to the provider error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Throttled(body),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ProviderError::AccessDenied(body),
        StatusCode::NOT_FOUND => ProviderError::NotFound(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::Malformed(body),
        s if s.is_server_error() => ProviderError::Transient(format!("{}: {}", s, body)),
        s => ProviderError::Unknown(format!("{}: {}", s, body)),
    }
}

fn classify_transport(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() || error.is_connect() {
        ProviderError::Transient(error.to_string())
    } else if error.is_decode() {
        ProviderError::Malformed(error.to_string())
    } else {
        ProviderError::Unknown(error.to_string())
    }
}

/// Role assumption through the credential gateway.
pub struct HttpAssumeRoleClient {
    client: Client,
    endpoint: String,
}

impl HttpAssumeRoleClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AssumeRolePort for HttpAssumeRoleClient {
    async fn assume_role(&self, request: &AssumeRoleRequest) -> std::result::Result<IssuedCredentials, CredentialError> {
        let url = format!("{}/assume-role", self.endpoint);
        debug!(session = %request.session_name, "POST {}", url);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CredentialError::Provider(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<IssuedCredentials>()
                .await
                .map_err(|e| CredentialError::Provider(format!("unreadable credentials: {}", e)));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => CredentialError::TrustRejected {
                role: request.role_identifier.clone(),
                message: body,
            },
            StatusCode::BAD_REQUEST => CredentialError::InvalidRequest(body),
            s => CredentialError::Provider(format!("{}: {}", s, body)),
        })
    }
}

#[derive(Serialize)]
struct ProbeBody<'a> {
    source: SourceType,
    region: &'a str,
    action: &'a str,
}

/// Findings gateway used by live connectors and probes.
pub struct HttpProviderApi {
    client: Client,
    endpoint: String,
}

impl HttpProviderApi {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        lease: &CredentialLease,
        path: &str,
        body: &B,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        lease
            .ensure_valid()
            .map_err(|e| ProviderError::AccessDenied(e.to_string()))?;
        let resp = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header(ACCESS_KEY_HEADER, lease.access_key_id())
            .header(SECRET_HEADER, lease.secret().secret_access_key())
            .header(SESSION_TOKEN_HEADER, lease.secret().session_token())
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(classify_status(status, body))
        }
    }
}

#[async_trait]
impl ProviderApiPort for HttpProviderApi {
    async fn list_findings(
        &self,
        lease: &CredentialLease,
        request: &ListFindingsRequest,
    ) -> std::result::Result<FindingsPage, ProviderError> {
        let resp = self.post(lease, "/findings", request).await?;
        resp.json::<FindingsPage>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn probe(
        &self,
        lease: &CredentialLease,
        source: SourceType,
        region: &str,
        action: &str,
    ) -> std::result::Result<(), ProviderError> {
        self.post(lease, "/probe", &ProbeBody { source, region, action })
            .await
            .map(|_| ())
    }
}
