//! Tooth formula endpoints.
//!
//! Fetches hand the raw JSON straight to [`Formula::decode_value`] so one malformed tooth entry
//! costs that tooth, not the whole chart.

use crate::client::{error_for_status, ApiClient, Envelope};
use crate::constants::{APPOINTMENTS_ENDPOINT, CLIENT_FORMULA_ENDPOINT};
use crate::transport::Method;
use crate::{ApiError, ApiResult};
use async_trait::async_trait;
use formula::{DecodedFormula, Formula, FormulaDocument, FormulaPersister, PersistError};
use serde_json::Value;
use std::sync::Arc;

impl ApiClient {
    /// `GET /formulas/user/{client_id}`, decoded.
    ///
    /// The backend may send the document bare or wrapped in an envelope; both are accepted.
    pub async fn fetch_client_formula(&self, client_id: &str) -> ApiResult<DecodedFormula> {
        let endpoint = format!("{CLIENT_FORMULA_ENDPOINT}/{}", path_segment(client_id)?);
        let response = self.request(&endpoint, Method::Get, None, None).await?;
        let body: Value = error_for_status(response)?.json()?;

        let document = if body.get("teeth").is_some() {
            body
        } else {
            let envelope: Envelope<Value> =
                serde_json::from_value(body).map_err(ApiError::Deserialization)?;
            reject_failed_envelope(&envelope)?;
            envelope.data.unwrap_or(Value::Null)
        };

        Ok(log_skipped(Formula::decode_value(&document), "client", client_id))
    }

    /// `GET /appointments/{appointment_id}`, decoding the appointment's `formula` field.
    ///
    /// An appointment without a formula decodes to an empty chart.
    pub async fn fetch_appointment_formula(
        &self,
        appointment_id: &str,
    ) -> ApiResult<DecodedFormula> {
        let endpoint = format!("{APPOINTMENTS_ENDPOINT}/{}", path_segment(appointment_id)?);
        let appointment: Value = self.get_data(&endpoint).await?;
        let document = appointment.get("formula").unwrap_or(&Value::Null);

        Ok(log_skipped(
            Formula::decode_value(document),
            "appointment",
            appointment_id,
        ))
    }

    /// `PUT /formulas/user/{client_id}` with the whole document.
    pub async fn save_client_formula(
        &self,
        client_id: &str,
        document: &FormulaDocument,
    ) -> ApiResult<()> {
        let endpoint = format!("{CLIENT_FORMULA_ENDPOINT}/{}", path_segment(client_id)?);
        let body = serde_json::to_value(document).map_err(ApiError::Serialization)?;
        let response = self.request(&endpoint, Method::Put, Some(body), None).await?;
        let response = error_for_status(response)?;

        if let Ok(envelope) = response.json::<Envelope<Value>>() {
            reject_failed_envelope(&envelope)?;
        }
        tracing::debug!(client_id, teeth = document.teeth.len(), "saved client formula");
        Ok(())
    }
}

/// Saves a [`formula::ChartEditor`]'s chart to one client's formula endpoint.
pub struct ClientFormulaPersister {
    client: Arc<ApiClient>,
    client_id: String,
}

impl ClientFormulaPersister {
    pub fn new(client: Arc<ApiClient>, client_id: impl Into<String>) -> ApiResult<Self> {
        let client_id = client_id.into();
        path_segment(&client_id)?;
        Ok(Self { client, client_id })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl FormulaPersister for ClientFormulaPersister {
    async fn persist(&self, document: &FormulaDocument) -> Result<(), PersistError> {
        self.client
            .save_client_formula(&self.client_id, document)
            .await
            .map_err(|e| Box::new(e) as PersistError)
    }
}

fn path_segment(id: &str) -> ApiResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::InvalidInput("identifier must not be empty".into()));
    }
    if id
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
    {
        return Err(ApiError::InvalidInput(format!(
            "identifier '{id}' is not a valid path segment"
        )));
    }
    Ok(id)
}

fn reject_failed_envelope(envelope: &Envelope<Value>) -> ApiResult<()> {
    match envelope.status {
        Some(status) if status >= 400 => Err(ApiError::Http {
            status,
            message: envelope.message.clone().unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}

fn log_skipped(decoded: DecodedFormula, owner: &str, id: &str) -> DecodedFormula {
    if !decoded.is_complete() {
        tracing::warn!(
            owner,
            id,
            skipped = decoded.skipped.len(),
            "formula decoded with skipped tooth entries"
        );
    }
    decoded
}
