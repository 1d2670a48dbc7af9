//! HTTP client for the unit-facing sync operations.

use outpost_core::models::Revision;
use outpost_core::protocol::{PullRequest, PullResponse, PushRequest, RevisionResponse};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::registry::UnitRegistration;

/// The three peer operations the scheduler drives against a unit.
///
/// The scheduler is generic over this so tests can substitute a recording
/// transport.
#[allow(async_fn_in_trait)]
pub trait UnitTransport {
    /// Ask the unit which of our revisions it last acknowledged for a
    /// dataset
    async fn query_revision(&self, unit: &UnitRegistration, dataset: &str) -> Result<Revision>;

    /// Push our changes onto the unit
    async fn push(
        &self,
        unit: &UnitRegistration,
        dataset: &str,
        request: &PushRequest,
    ) -> Result<()>;

    /// Ask the unit for its local edits since `from_version`
    async fn pull(
        &self,
        unit: &UnitRegistration,
        dataset: &str,
        from_version: Revision,
    ) -> Result<PullResponse>;
}

/// Reqwest-backed transport talking to unit daemons
#[derive(Clone)]
pub struct UnitClient {
    client: reqwest::Client,
}

impl UnitClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    fn url(unit: &UnitRegistration, dataset: &str, operation: &str) -> String {
        format!(
            "{}/v1/datasets/{}/{}",
            unit.address.trim_end_matches('/'),
            dataset,
            operation
        )
    }

    fn authorize(
        request: reqwest::RequestBuilder,
        unit: &UnitRegistration,
    ) -> reqwest::RequestBuilder {
        match &unit.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Api(parse_api_error(status, &body)))
    }
}

impl UnitTransport for UnitClient {
    async fn query_revision(&self, unit: &UnitRegistration, dataset: &str) -> Result<Revision> {
        let request = Self::authorize(
            self.client.get(Self::url(unit, dataset, "revision")),
            unit,
        );
        let response = Self::check(request.send().await?).await?;
        let payload = response.json::<RevisionResponse>().await?;
        Ok(payload.revision)
    }

    async fn push(
        &self,
        unit: &UnitRegistration,
        dataset: &str,
        request: &PushRequest,
    ) -> Result<()> {
        let builder = Self::authorize(
            self.client.post(Self::url(unit, dataset, "push")).json(request),
            unit,
        );
        Self::check(builder.send().await?).await?;
        Ok(())
    }

    async fn pull(
        &self,
        unit: &UnitRegistration,
        dataset: &str,
        from_version: Revision,
    ) -> Result<PullResponse> {
        let builder = Self::authorize(
            self.client
                .post(Self::url(unit, dataset, "pull"))
                .json(&PullRequest { from_version }),
            unit,
        );
        let response = Self::check(builder.send().await?).await?;
        Ok(response.json::<PullResponse>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(address: &str) -> UnitRegistration {
        UnitRegistration {
            id: "alpha".to_string(),
            address: address.to_string(),
            token: None,
            active_window: None,
            sync_interval_minutes: 60,
            retry_interval_minutes: 15,
            has_errors: false,
        }
    }

    #[test]
    fn urls_tolerate_trailing_slashes() {
        let with_slash = unit("http://unit.example:8071/");
        assert_eq!(
            UnitClient::url(&with_slash, "roads", "pull"),
            "http://unit.example:8071/v1/datasets/roads/pull"
        );
    }

    #[test]
    fn api_errors_prefer_the_structured_body() {
        let parsed = parse_api_error(
            StatusCode::CONFLICT,
            r#"{"error": "invalid fromVersion 3"}"#,
        );
        assert_eq!(parsed, "invalid fromVersion 3 (409)");

        let raw = parse_api_error(StatusCode::BAD_GATEWAY, "upstream died");
        assert_eq!(raw, "upstream died (502)");

        let empty = parse_api_error(StatusCode::NOT_FOUND, "");
        assert_eq!(empty, "HTTP 404");
    }
}
