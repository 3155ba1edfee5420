use std::time::Duration;

use async_trait::async_trait;
use freightdesk_core::config::BackendConfig;
use freightdesk_core::domain::price_guide::PriceGuideItem;
use freightdesk_core::domain::shipment::DraftId;
use freightdesk_core::domain::wire::{
    DimensionsPayload, PaymentConfirmation, PriceGuideWire, ShipmentRecord,
};
use freightdesk_core::errors::{ExternalCallError, ExternalErrorKind};
use freightdesk_core::flows::FlowEndpoints;
use freightdesk_core::ShipmentBackend;
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// `ShipmentBackend` over the remote shipment REST API.
pub struct HttpShipmentBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpShipmentBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send<T>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ExternalCallError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(|error| {
            warn!(event_name = "backend.call.transport_error", operation, error = %error);
            ExternalCallError::new(operation, ExternalErrorKind::Transport, error.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "backend.call.rejected",
                operation,
                status = status.as_u16(),
                "backend returned a non-success status"
            );
            return Err(ExternalCallError::new(
                operation,
                ExternalErrorKind::Status(status.as_u16()),
                body,
            ));
        }

        debug!(event_name = "backend.call.succeeded", operation, status = status.as_u16());
        response.json::<T>().await.map_err(|error| {
            ExternalCallError::new(operation, ExternalErrorKind::Decode, error.to_string())
        })
    }
}

#[async_trait]
impl ShipmentBackend for HttpShipmentBackend {
    async fn price_guides(&self) -> Result<Vec<PriceGuideItem>, ExternalCallError> {
        let guides: Vec<PriceGuideWire> =
            self.send("price_guides", self.request(Method::GET, "/price-guides")).await?;
        Ok(guides.into_iter().map(PriceGuideItem::from).collect())
    }

    async fn save_dimensions(
        &self,
        endpoints: &FlowEndpoints,
        draft_id: &DraftId,
        payload: &DimensionsPayload,
    ) -> Result<ShipmentRecord, ExternalCallError> {
        let request = self.request(Method::PUT, &endpoints.dimensions(&draft_id.0)).json(payload);
        self.send("save_dimensions", request).await
    }

    async fn confirm_payment(
        &self,
        endpoints: &FlowEndpoints,
        draft_id: &DraftId,
        confirmation: &PaymentConfirmation,
    ) -> Result<ShipmentRecord, ExternalCallError> {
        let request =
            self.request(Method::PUT, &endpoints.payment(&draft_id.0)).json(confirmation);
        self.send("confirm_payment", request).await
    }

    async fn fetch_shipment(
        &self,
        endpoints: &FlowEndpoints,
        id: &str,
    ) -> Result<ShipmentRecord, ExternalCallError> {
        self.send("fetch_shipment", self.request(Method::GET, &endpoints.shipment(id))).await
    }
}
