// API client - thin blocking wrapper over the Bridge HTTP API

use anyhow::{anyhow, Result};
use serde_json::Value;
use uuid::Uuid;

use crate::profile::Profile;

/// Sends authenticated requests to `/api/v1`.
pub struct ApiClient {
    base: String,
    user_id: Uuid,
    role: Option<String>,
    idempotency_key: Option<String>,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(profile: &Profile, idempotency_key: Option<String>) -> Result<Self> {
        Ok(Self {
            base: format!("{}/api/v1", profile.server.trim_end_matches('/')),
            user_id: profile.require_user()?,
            role: profile.role.clone(),
            idempotency_key,
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        })
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &format!("{}{}", self.base, path))
            .set("X-User-Id", &self.user_id.to_string());
        if let Some(role) = &self.role {
            request = request.set("X-User-Role", role);
        }
        if let Some(key) = &self.idempotency_key {
            request = request.set("Idempotency-Key", key);
        }
        request
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        read_response(self.request("GET", path).call())
    }

    pub fn post(&self, path: &str, body: &Value) -> Result<Value> {
        read_response(self.request("POST", path).send_json(body.clone()))
    }
}

fn read_response(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<Value> {
    match result {
        Ok(response) => Ok(response.into_json()?),
        Err(ureq::Error::Status(code, response)) => {
            let body: Value = response.into_json().unwrap_or(Value::Null);
            Err(anyhow!(describe_error(code, &body)))
        }
        Err(e) => Err(anyhow!("Request failed: {}", e)),
    }
}

/// Formats an API error body: `HTTP 409 conflict: message [field]`.
pub fn describe_error(code: u16, body: &Value) -> String {
    let kind = body["error"].as_str().unwrap_or("error");
    let message = body["message"].as_str().unwrap_or("no details");
    match body["field"].as_str() {
        Some(field) => format!("HTTP {} {}: {} [{}]", code, kind, message, field),
        None => format!("HTTP {} {}: {}", code, kind, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_error_with_field() {
        let body = json!({ "error": "validation_error", "message": "must be positive", "field": "amount" });
        assert_eq!(
            describe_error(422, &body),
            "HTTP 422 validation_error: must be positive [amount]"
        );
    }

    #[test]
    fn test_describe_error_without_body() {
        assert_eq!(describe_error(502, &Value::Null), "HTTP 502 error: no details");
    }

    #[test]
    fn test_client_requires_user() {
        assert!(ApiClient::new(&Profile::default(), None).is_err());

        let profile = Profile {
            server: "http://localhost:8080/".to_string(),
            user_id: Some(Uuid::new_v4()),
            role: None,
        };
        let client = ApiClient::new(&profile, None).unwrap();
        assert_eq!(client.base, "http://localhost:8080/api/v1");
    }
}
