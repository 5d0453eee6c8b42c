use std::time::Duration;

use nrm_client_core::auth::string_or_number;
use nrm_client_core::{
    AuthContext, AuthError, AuthInputError, AuthenticatedClient, HttpResponse, RequestConfig,
    normalize_base_url, normalize_email,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const UPLOAD_TIMEOUT_MS: u64 = 120_000;
pub const KML_CONTENT_TYPE: &str = "application/vnd.google-earth.kml+xml";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldInputError {
    #[error("base url: {0}")]
    BaseUrl(AuthInputError),
    #[error("plan id is required")]
    MissingPlanId,
    #[error("project id is required")]
    MissingProjectId,
    #[error("project id `{0}` is not a single path segment")]
    InvalidProjectId(String),
    #[error("work demand item id is required")]
    MissingItemId,
    #[error("email: {0}")]
    Email(AuthInputError),
    #[error("file `{0}` is not a .kml file")]
    NotKml(String),
    #[error("kml file is empty")]
    EmptyKml,
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

#[derive(Debug, Error)]
pub enum FieldApiError {
    #[error("field_api_invalid_input:{0}")]
    Input(#[from] FieldInputError),
    #[error("field_api_invalid_path")]
    InvalidPath,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("field_api_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("field_api_json_decode_failed:{message}")]
    Decode { message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
    #[serde(alias = "plan_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "plan")]
    pub name: String,
    #[serde(default)]
    pub facilitator_name: Option<String>,
    #[serde(default)]
    pub village_name: Option<String>,
    #[serde(default)]
    pub gram_panchayat: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_dpr_generated: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlansEnvelope {
    Bare(Vec<Plan>),
    Wrapped { plans: Vec<Plan> },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, FieldInputError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(FieldInputError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(FieldInputError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkDemandDecision {
    Accept,
    Reject { reason: Option<String> },
}

impl WorkDemandDecision {
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Accept => "accepted",
            Self::Reject { .. } => "rejected",
        }
    }
}

/// State transition for one work-demand item, optionally with corrected
/// coordinates captured in the field.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkDemandUpdate {
    pub item_id: String,
    pub plan_id: Option<String>,
    pub decision: WorkDemandDecision,
    pub coordinates: Option<Coordinates>,
}

impl WorkDemandUpdate {
    #[must_use]
    pub fn accept(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            plan_id: None,
            decision: WorkDemandDecision::Accept,
            coordinates: None,
        }
    }

    #[must_use]
    pub fn reject(item_id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            item_id: item_id.into(),
            plan_id: None,
            decision: WorkDemandDecision::Reject { reason },
            coordinates: None,
        }
    }

    #[must_use]
    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    #[must_use]
    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    fn payload(&self) -> Result<WorkDemandPayload<'_>, FieldInputError> {
        let item_id = self.item_id.trim();
        if item_id.is_empty() {
            return Err(FieldInputError::MissingItemId);
        }
        if let Some(coordinates) = self.coordinates {
            Coordinates::new(coordinates.latitude, coordinates.longitude)?;
        }
        let reason = match &self.decision {
            WorkDemandDecision::Reject { reason } => reason
                .as_deref()
                .map(str::trim)
                .filter(|reason| !reason.is_empty()),
            WorkDemandDecision::Accept => None,
        };
        Ok(WorkDemandPayload {
            item_id,
            plan_id: self
                .plan_id
                .as_deref()
                .map(str::trim)
                .filter(|plan_id| !plan_id.is_empty()),
            status: self.decision.status(),
            reason,
            latitude: self.coordinates.map(|coordinates| coordinates.latitude),
            longitude: self.coordinates.map(|coordinates| coordinates.longitude),
        })
    }
}

#[derive(Debug, Serialize)]
struct WorkDemandPayload<'a> {
    item_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_id: Option<&'a str>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DprEmailRequest<'a> {
    plan_id: &'a str,
    email: &'a str,
}

/// Project ids are interpolated into the plans path, so only plain segment
/// characters are accepted.
fn project_segment(project_id: &str) -> Result<&str, FieldInputError> {
    let project_id = project_id.trim();
    if project_id.is_empty() {
        return Err(FieldInputError::MissingProjectId);
    }
    let plain = project_id
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.'));
    if !plain || project_id == "." || project_id == ".." {
        return Err(FieldInputError::InvalidProjectId(project_id.to_string()));
    }
    Ok(project_id)
}

/// Typed calls against the field backend. Every call goes through the
/// shared authenticated request helper.
#[derive(Debug, Clone)]
pub struct FieldApiClient {
    base_url: String,
    timeout: Duration,
    client: AuthenticatedClient,
}

impl FieldApiClient {
    pub fn new(base_url: &str, client: AuthenticatedClient) -> Result<Self, FieldApiError> {
        let base_url = normalize_base_url(base_url).map_err(FieldInputError::BaseUrl)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            client,
        })
    }

    pub fn from_context(context: &AuthContext) -> Result<Self, FieldApiError> {
        Self::new(
            context.resolver().config().api_base_url.as_str(),
            context.client().clone(),
        )
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn dpr_email_path() -> &'static str {
        "/api/v1/generate_dpr/"
    }

    #[must_use]
    pub fn upload_kml_path() -> &'static str {
        "/api/v1/upload_kml/"
    }

    #[must_use]
    pub fn project_plans_path(project_id: &str) -> String {
        format!("/api/v1/projects/{}/plans/", project_id.trim())
    }

    #[must_use]
    pub fn upsert_item_path() -> &'static str {
        "/api/v1/upsert_item/"
    }

    pub async fn request_dpr_email(
        &self,
        plan_id: &str,
        email: &str,
    ) -> Result<serde_json::Value, FieldApiError> {
        let plan_id = plan_id.trim();
        if plan_id.is_empty() {
            return Err(FieldInputError::MissingPlanId.into());
        }
        let email = normalize_email(email).map_err(FieldInputError::Email)?;
        let body = serde_json::to_value(DprEmailRequest {
            plan_id,
            email: &email,
        })
        .map_err(decode_error)?;
        let response = self
            .send(Self::dpr_email_path(), RequestConfig::post_json(body))
            .await?;
        tracing::info!(plan_id, "dpr email requested");
        decode_value(&response)
    }

    pub async fn upload_kml(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<serde_json::Value, FieldApiError> {
        let file_name = file_name.trim();
        if !has_kml_extension(file_name) {
            return Err(FieldInputError::NotKml(file_name.to_string()).into());
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(FieldInputError::EmptyKml.into());
        }
        let size = bytes.len();
        let request = RequestConfig::upload("file", file_name, KML_CONTENT_TYPE, bytes)
            .with_timeout(Duration::from_millis(UPLOAD_TIMEOUT_MS));
        let response = self.send(Self::upload_kml_path(), request).await?;
        tracing::info!(file_name, size, "kml uploaded");
        decode_value(&response)
    }

    pub async fn list_plans(&self, project_id: &str) -> Result<Vec<Plan>, FieldApiError> {
        let project_id = project_segment(project_id)?;
        let response = self
            .send(
                Self::project_plans_path(project_id).as_str(),
                RequestConfig::get(),
            )
            .await?;
        let plans = match response
            .json::<PlansEnvelope>()
            .map_err(decode_error)?
        {
            PlansEnvelope::Bare(plans) | PlansEnvelope::Wrapped { plans } => plans,
        };
        tracing::debug!(project_id, count = plans.len(), "plans fetched");
        Ok(plans)
    }

    pub async fn upsert_work_demand(
        &self,
        update: &WorkDemandUpdate,
    ) -> Result<serde_json::Value, FieldApiError> {
        let payload = update.payload()?;
        let body = serde_json::to_value(&payload).map_err(decode_error)?;
        let response = self
            .send(Self::upsert_item_path(), RequestConfig::post_json(body))
            .await?;
        tracing::info!(
            item_id = payload.item_id,
            status = payload.status,
            "work demand updated"
        );
        decode_value(&response)
    }

    async fn send(
        &self,
        path: &str,
        request: RequestConfig,
    ) -> Result<HttpResponse, FieldApiError> {
        let url = self.endpoint(path).ok_or(FieldApiError::InvalidPath)?;
        let request = if request.timeout.is_some() {
            request
        } else {
            request.with_timeout(self.timeout)
        };
        let request = request
            .with_header("accept", "application/json")
            .with_header("x-request-id", format!("req_{}", Uuid::new_v4().simple()));
        let response = self.client.send(url.as_str(), request).await?;
        response.error_for_status().map_err(|error| {
            tracing::warn!(path, status = error.status, "field api call rejected");
            FieldApiError::Http {
                status: error.status,
                body: error.body,
            }
        })
    }
}

fn has_kml_extension(file_name: &str) -> bool {
    std::path::Path::new(file_name)
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("kml"))
}

fn decode_value(response: &HttpResponse) -> Result<serde_json::Value, FieldApiError> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    response.json().map_err(decode_error)
}

fn decode_error(error: serde_json::Error) -> FieldApiError {
    FieldApiError::Decode {
        message: error.to_string(),
    }
}
