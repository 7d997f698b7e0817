use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::models::SearchHit;

pub const DEFAULT_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
// the API refuses more than ten per page
const MAX_RESULTS: u8 = 10;

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, site: Option<&str>) -> Result<Vec<SearchHit>>;
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

/// Google Custom Search compatible client.
pub struct SearchClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
    num_results: u8,
}

impl SearchClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        engine_id: impl Into<String>,
        num_results: u8,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            num_results: num_results.clamp(1, MAX_RESULTS),
        }
    }

    fn url(&self, query: &str, site: Option<&str>) -> Result<Url> {
        let num = self.num_results.to_string();
        let mut params = vec![
            ("key", self.api_key.as_str()),
            ("cx", self.engine_id.as_str()),
            ("q", query),
            ("num", num.as_str()),
        ];
        if let Some(site) = site {
            params.push(("siteSearch", site));
            params.push(("siteSearchFilter", "i"));
        }
        Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| GatewayError::Config(format!("bad search endpoint: {e}")))
    }
}

#[async_trait]
impl WebSearch for SearchClient {
    async fn search(&self, query: &str, site: Option<&str>) -> Result<Vec<SearchHit>> {
        debug!(query, site, "calling search API");
        let res = self.client.get(self.url(query, site)?).send().await?;

        if !res.status().is_success() {
            let status = res.status();
            warn!(%status, "search API returned an error");
            return Err(GatewayError::Upstream(format!("search API returned {status}")));
        }

        let body: ApiResponse = res
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("unreadable search results: {e}")))?;
        Ok(body.items)
    }
}
