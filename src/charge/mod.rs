use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use tracing::{info, warn};

use crate::config::Config;
use crate::charge::model::{Invoice, InvoiceProps};

pub mod model;

/// HTTP client for a Lightning Charge-style invoicing server.
#[derive(Clone)]
pub struct ChargeClient {
    http: Client,
    base_url: Url,
    api_token: String,
}

impl fmt::Debug for ChargeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChargeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// The invoicing operations this crate consumes. The broker takes this trait
/// so tests can substitute a recording double.
#[async_trait]
pub trait ChargeService: Send + Sync {
    async fn create_invoice(&self, props: &InvoiceProps) -> Result<Invoice>;

    async fn invoice(&self, id: &str) -> Result<Option<Invoice>>;

    async fn invoices(&self) -> Result<Vec<Invoice>>;
}

impl ChargeClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.charge.base_url).context("invalid charge base URL")?;
        Ok(Self::with_base_url(cfg.charge.api_token.clone(), base_url))
    }

    pub fn with_base_url(api_token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("paygate/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_token,
        }
    }

    pub fn build_create_request(&self, props: &InvoiceProps) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("invoice")
            .context("invalid charge base URL")?;
        self.http
            .post(endpoint)
            .basic_auth("api-token", Some(&self.api_token))
            .header("Content-Type", "application/json")
            .json(props)
            .build()
            .context("failed to build charge request")
    }

    async fn read_invoice_response(res: reqwest::Response) -> Result<Invoice> {
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by charge server: {}", body);
            return Err(anyhow!("received 429 from charge server: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("Charge server error - Status: {}, Body: {}", status, body);
            return Err(anyhow!("charge server error {}: {}", status, body));
        }
        let invoice: Invoice = res
            .json()
            .await
            .context("invalid charge server response JSON")?;
        Ok(invoice)
    }
}

#[async_trait]
impl ChargeService for ChargeClient {
    async fn create_invoice(&self, props: &InvoiceProps) -> Result<Invoice> {
        let request = self.build_create_request(props)?;
        info!(url = %request.url(), "creating invoice");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach charge server")?;
        let invoice = Self::read_invoice_response(res).await?;
        info!(id = %invoice.id, "created invoice");
        Ok(invoice)
    }

    async fn invoice(&self, id: &str) -> Result<Option<Invoice>> {
        let url = self
            .base_url
            .join(&format!("invoice/{}", id))
            .context("invalid charge base URL")?;
        let res = self
            .http
            .get(url)
            .basic_auth("api-token", Some(&self.api_token))
            .send()
            .await
            .context("failed to reach charge server")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::read_invoice_response(res).await?))
    }

    async fn invoices(&self) -> Result<Vec<Invoice>> {
        let url = self
            .base_url
            .join("invoices")
            .context("invalid charge base URL")?;
        let res = self
            .http
            .get(url)
            .basic_auth("api-token", Some(&self.api_token))
            .send()
            .await
            .context("failed to reach charge server")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "charge server listing error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res.json::<Vec<Invoice>>().await?)
    }
}
