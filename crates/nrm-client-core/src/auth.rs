use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
pub const ENV_API_BASE_URL: &str = "NRM_API_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("email must not be empty")]
    EmptyEmail,
    #[error("email must contain a local part and a domain")]
    InvalidEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("credential is missing an access token")]
    EmptyAccessToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(deserialize_with = "string_or_number")]
    pub project_id: String,
    #[serde(default)]
    pub project_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default, rename = "isSuperAdmin", alias = "is_superadmin")]
    pub is_superadmin: bool,
    #[serde(default)]
    pub project_details: Vec<ProjectDetail>,
}

impl UserRecord {
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// First assigned project, `None` when the user has no projects.
    #[must_use]
    pub fn primary_project(&self) -> Option<&ProjectDetail> {
        self.project_details.first()
    }
}

/// Credential payload as the host shell injects it. Every field is optional
/// on the wire; conversion into [`CredentialBundle`] enforces a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCredential {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HostCredential {
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.access_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "HostCredential")]
pub struct CredentialBundle {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserRecord>,
    timestamp: DateTime<Utc>,
}

impl CredentialBundle {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        user: Option<UserRecord>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(CredentialError::EmptyAccessToken);
        }
        let refresh_token = refresh_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Ok(Self {
            access_token,
            refresh_token,
            user,
            timestamp,
        })
    }

    pub fn from_host(host: HostCredential, now: DateTime<Utc>) -> Result<Self, CredentialError> {
        let HostCredential {
            access_token,
            refresh_token,
            user,
            timestamp,
        } = host;
        Self::new(
            access_token.unwrap_or_default(),
            refresh_token,
            user,
            timestamp.unwrap_or(now),
        )
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserRecord> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn organization_name(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|user| user.organization_name.as_str())
            .filter(|name| !name.is_empty())
    }

    #[must_use]
    pub fn is_superadmin(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.is_superadmin)
    }
}

impl TryFrom<HostCredential> for CredentialBundle {
    type Error = CredentialError;

    fn try_from(host: HostCredential) -> Result<Self, Self::Error> {
        Self::from_host(host, Utc::now())
    }
}

/// Identity used when development mode gives up waiting for the host.
#[must_use]
pub fn development_mock_bundle(now: DateTime<Utc>) -> CredentialBundle {
    let user = UserRecord {
        id: "dev-user".to_string(),
        first_name: "Field".to_string(),
        last_name: "Developer".to_string(),
        email: "developer@localhost".to_string(),
        organization_name: "Development Organization".to_string(),
        is_superadmin: true,
        project_details: vec![ProjectDetail {
            project_id: "dev-project".to_string(),
            project_name: "Development Project".to_string(),
        }],
    };
    CredentialBundle {
        access_token: "dev-mock-access-token".to_string(),
        refresh_token: Some("dev-mock-refresh-token".to_string()),
        user: Some(user),
        timestamp: now,
    }
}

pub fn resolve_api_base_url() -> Result<(String, &'static str), AuthInputError> {
    if let Some(base_url) = env_non_empty(ENV_API_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_API_BASE_URL));
    }
    normalize_base_url(DEFAULT_API_BASE_URL).map(|normalized| (normalized, "default_local"))
}

pub fn normalize_base_url(raw: &str) -> Result<String, AuthInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(AuthInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AuthInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

pub fn normalize_email(raw: &str) -> Result<String, AuthInputError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(AuthInputError::EmptyEmail);
    }
    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(normalized),
        _ => Err(AuthInputError::InvalidEmail),
    }
}

pub(crate) fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn bundle_rejects_blank_access_token() {
        let error = CredentialBundle::new("   ", None, None, fixed_now()).expect_err("blank token");
        assert_eq!(error, CredentialError::EmptyAccessToken);
    }

    #[test]
    fn host_payload_deserializes_camel_case_fields() {
        let raw = r#"{
            "accessToken": "abc",
            "refreshToken": "def",
            "user": {
                "id": 17,
                "firstName": "Asha",
                "lastName": "Rao",
                "email": "asha@example.org",
                "organizationName": "Watershed Trust",
                "isSuperAdmin": false,
                "projectDetails": [{"projectId": 4, "projectName": "Upper Basin"}]
            }
        }"#;
        let host: HostCredential = serde_json::from_str(raw).expect("host payload");
        let bundle = CredentialBundle::from_host(host, fixed_now()).expect("bundle");

        assert_eq!(bundle.access_token(), "abc");
        assert_eq!(bundle.refresh_token(), Some("def"));
        assert_eq!(bundle.timestamp(), fixed_now());
        assert_eq!(bundle.organization_name(), Some("Watershed Trust"));
        assert!(!bundle.is_superadmin());
        let user = bundle.user().expect("user");
        assert_eq!(user.id, "17");
        assert_eq!(user.display_name(), "Asha Rao");
        assert_eq!(
            user.primary_project().map(|project| project.project_id.as_str()),
            Some("4")
        );
    }

    #[test]
    fn missing_project_details_means_no_project() {
        let user: UserRecord =
            serde_json::from_str(r#"{"id": "u1", "email": "a@b.org"}"#).expect("user");
        assert!(user.project_details.is_empty());
        assert!(user.primary_project().is_none());
    }

    #[test]
    fn bundle_json_without_token_is_rejected() {
        assert!(CredentialBundle::from_json(r#"{"accessToken": ""}"#).is_err());
        assert!(CredentialBundle::from_json(r#"{"user": {"id": "x"}}"#).is_err());
        assert!(CredentialBundle::from_json("not json").is_err());
    }

    #[test]
    fn bundle_json_preserves_timestamp() {
        let bundle = CredentialBundle::new("tok", None, None, fixed_now()).expect("bundle");
        let raw = serde_json::to_string(&bundle).expect("serialize");
        let decoded = CredentialBundle::from_json(&raw).expect("decode");
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn mock_bundle_is_superadmin() {
        let bundle = development_mock_bundle(fixed_now());
        assert!(bundle.is_superadmin());
        assert!(!bundle.access_token().is_empty());
    }

    #[test]
    fn normalize_base_url_trims_and_drops_trailing_slash() {
        let normalized = normalize_base_url(" https://nrm.example.org/ ").expect("valid base url");
        assert_eq!(normalized, "https://nrm.example.org");
    }

    #[test]
    fn normalize_base_url_requires_http_scheme() {
        let error = normalize_base_url("nrm.example.org").expect_err("expected invalid url");
        assert_eq!(error, AuthInputError::InvalidBaseUrl);
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        let normalized = normalize_email("  Asha@Watershed.ORG ").expect("valid email");
        assert_eq!(normalized, "asha@watershed.org");
    }

    #[test]
    fn normalize_email_requires_domain() {
        assert_eq!(normalize_email(" "), Err(AuthInputError::EmptyEmail));
        assert_eq!(normalize_email("asha"), Err(AuthInputError::InvalidEmail));
        assert_eq!(normalize_email("@x.org"), Err(AuthInputError::InvalidEmail));
    }
}
