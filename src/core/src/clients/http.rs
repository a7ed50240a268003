//! Shared request/response pipeline for the four REST clients.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::auth::L2Signer;
use crate::errors::ClientError;

/// Builds URLs with sorted query parameters, applies a timeout, and injects
/// optional L2 auth headers before sending.
#[derive(Clone)]
pub struct HttpRequester {
    client: Client,
    timeout: Duration,
    signer: Option<L2Signer>,
}

impl HttpRequester {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
            signer: None,
        }
    }

    pub fn with_signer(timeout: Duration, signer: L2Signer) -> Self {
        Self {
            client: Client::new(),
            timeout,
            signer: Some(signer),
        }
    }

    /// Issue a GET against `base_url + path`, applying `params` as sorted query
    /// parameters, and decode the JSON body as `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);

        let query_string = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let path_with_query = if query_string.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query_string)
        };

        let url = format!("{}{}", base_url, path_with_query);

        let mut request = self.client.get(&url).timeout(self.timeout);

        if let Some(signer) = &self.signer {
            let timestamp = chrono::Utc::now().timestamp();
            let headers = signer.sign(timestamp, "GET", &path_with_query, "");
            request = request
                .header("POLY_ADDRESS", headers.address)
                .header("POLY_SIGNATURE", headers.signature)
                .header("POLY_TIMESTAMP", headers.timestamp)
                .header("POLY_API_KEY", headers.api_key)
                .header("POLY_PASSPHRASE", headers.passphrase);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::NetworkError { is_timeout: true }
            } else {
                ClientError::from_reqwest(&e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| ClientError::from_reqwest(&e))?;
        serde_json::from_str::<T>(&body).map_err(|e| ClientError::ValidationError {
            issues: vec![e.to_string()],
        })
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
