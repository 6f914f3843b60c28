//! Cloud platform REST client.
//!
//! Thin client for the external device platform the engine mirrors state
//! into. Authentication is JWT based: the client logs in lazily, caches
//! the token, and re-authenticates once on a 401. Platform traffic is
//! best effort throughout; every operation degrades to a `false`/`None`/
//! empty result with a warning instead of surfacing an error, because
//! local state must keep working when the platform is down.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::PlatformSettings;
use crate::model::{logical_key, Device};

/// REST client for the external device platform.
pub struct PlatformClient {
    settings: PlatformSettings,
    http_client: reqwest::Client,
    /// Cached JWT, populated on first use.
    token: RwLock<Option<String>>,
}

impl PlatformClient {
    pub fn new(settings: PlatformSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            settings,
            http_client,
            token: RwLock::new(None),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Attribute payload for a device: platform-prefixed property keys are
    /// stripped back to their logical names, everything else passes through.
    pub fn attribute_payload(properties: &HashMap<String, String>) -> JsonValue {
        let mut payload = serde_json::Map::with_capacity(properties.len());
        for (key, value) in properties {
            payload.insert(logical_key(key).to_string(), JsonValue::String(value.clone()));
        }
        JsonValue::Object(payload)
    }

    /// Log in and cache the JWT. Returns false when the platform rejects
    /// the credentials or is unreachable.
    async fn ensure_authenticated(&self) -> bool {
        if self.token.read().await.is_some() {
            return true;
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> bool {
        let body = json!({
            "username": self.settings.username,
            "password": self.settings.password,
        });

        let response = match self
            .http_client
            .post(self.api_url("/api/auth/login"))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Platform login request failed: {}", e);
                return false;
            }
        };

        if !response.status().is_success() {
            warn!("Platform login rejected: status {}", response.status());
            return false;
        }

        let parsed: JsonValue = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Undecodable platform login response: {}", e);
                return false;
            }
        };

        match parsed.get("token").and_then(JsonValue::as_str) {
            Some(token) => {
                *self.token.write().await = Some(token.to_string());
                debug!("Platform authentication refreshed");
                true
            }
            None => {
                warn!("Platform login response carried no token");
                false
            }
        }
    }

    /// Send an authenticated request, retrying once with a fresh token on
    /// a 401.
    async fn send_authed(
        &self,
        build: impl Fn(&str) -> reqwest::RequestBuilder,
    ) -> Option<reqwest::Response> {
        if !self.ensure_authenticated().await {
            return None;
        }

        for attempt in 0..2 {
            let token = self.token.read().await.clone()?;
            let response = match build(&token).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Platform request failed: {}", e);
                    return None;
                }
            };

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && attempt == 0 {
                *self.token.write().await = None;
                if !self.refresh_token().await {
                    return None;
                }
                continue;
            }
            return Some(response);
        }
        None
    }

    /// Push current device properties as platform attributes using the
    /// device's own access token. Returns false for devices without a
    /// platform link.
    pub async fn push_attributes(&self, device: &Device) -> bool {
        self.push_attribute_delta(device, &device.properties).await
    }

    /// Push just the given property delta as platform attributes, so a
    /// single-property change does not re-send the whole attribute set.
    pub async fn push_attribute_delta(
        &self,
        device: &Device,
        delta: &HashMap<String, String>,
    ) -> bool {
        let Some(token) = &device.platform_token else {
            debug!("Device {} has no platform token, skipping push", device.name);
            return false;
        };
        if delta.is_empty() {
            return true;
        }

        let payload = Self::attribute_payload(delta);
        let url = self.api_url(&format!("/api/v1/{}/attributes", token));

        match self.http_client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Pushed {} attributes for device {}", delta.len(), device.name);
                true
            }
            Ok(response) => {
                warn!(
                    "Platform rejected attributes for {}: status {}",
                    device.name,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Attribute push failed for {}: {}", device.name, e);
                false
            }
        }
    }

    /// Push a telemetry sample using the device's access token.
    pub async fn push_telemetry(&self, device: &Device, telemetry: &JsonValue) -> bool {
        let Some(token) = &device.platform_token else {
            return false;
        };

        let url = self.api_url(&format!("/api/v1/{}/telemetry", token));
        match self.http_client.post(&url).json(telemetry).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "Platform rejected telemetry for {}: status {}",
                    device.name,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Telemetry push failed for {}: {}", device.name, e);
                false
            }
        }
    }

    /// Look up a device's access token by its platform-side name.
    pub async fn lookup_token_by_name(&self, name: &str) -> Option<String> {
        let url = self.api_url(&format!(
            "/api/tenant/devices?deviceName={}",
            urlencoding::encode(name)
        ));
        let response = self
            .send_authed(|token| {
                self.http_client
                    .get(&url)
                    .header("X-Authorization", format!("Bearer {}", token))
            })
            .await?;

        if !response.status().is_success() {
            warn!(
                "Platform device lookup for '{}' failed: status {}",
                name,
                response.status()
            );
            return None;
        }

        let parsed: JsonValue = response.json().await.ok()?;
        let device_id = parsed
            .get("id")
            .and_then(|id| id.get("id"))
            .and_then(JsonValue::as_str)?
            .to_string();

        self.lookup_token_by_id(&device_id).await
    }

    /// Look up a device's access token from its platform device id.
    pub async fn lookup_token_by_id(&self, platform_device_id: &str) -> Option<String> {
        let url = self.api_url(&format!("/api/device/{}/credentials", platform_device_id));
        let response = self
            .send_authed(|token| {
                self.http_client
                    .get(&url)
                    .header("X-Authorization", format!("Bearer {}", token))
            })
            .await?;

        if !response.status().is_success() {
            warn!(
                "Platform credentials lookup for {} failed: status {}",
                platform_device_id,
                response.status()
            );
            return None;
        }

        let parsed: JsonValue = response.json().await.ok()?;
        parsed
            .get("credentialsId")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    /// Create a platform-side twin for a device. Returns the remote
    /// device id on success.
    pub async fn create_remote_device(&self, device: &Device) -> Option<String> {
        let body = json!({
            "name": device.name,
            "type": device.device_type,
        });
        let url = self.api_url("/api/device");
        let response = self
            .send_authed(|token| {
                self.http_client
                    .post(&url)
                    .header("X-Authorization", format!("Bearer {}", token))
                    .json(&body)
            })
            .await?;

        if !response.status().is_success() {
            warn!(
                "Platform device create for {} failed: status {}",
                device.name,
                response.status()
            );
            return None;
        }

        let parsed: JsonValue = response.json().await.ok()?;
        parsed
            .get("id")
            .and_then(|id| id.get("id"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    /// Update the platform-side twin's name and type. Requires an
    /// existing linkage.
    pub async fn update_remote_device(&self, device: &Device) -> bool {
        let Some(remote_id) = &device.platform_device_id else {
            return false;
        };

        let body = json!({
            "id": { "id": remote_id, "entityType": "DEVICE" },
            "name": device.name,
            "type": device.device_type,
        });
        let url = self.api_url("/api/device");
        let response = self
            .send_authed(|token| {
                self.http_client
                    .post(&url)
                    .header("X-Authorization", format!("Bearer {}", token))
                    .json(&body)
            })
            .await;

        match response {
            Some(response) if response.status().is_success() => true,
            Some(response) => {
                warn!(
                    "Platform device update for {} failed: status {}",
                    device.name,
                    response.status()
                );
                false
            }
            None => false,
        }
    }

    /// Delete the platform-side twin of a device. Best effort.
    pub async fn delete_remote_device(&self, platform_device_id: &str) -> bool {
        let url = self.api_url(&format!("/api/device/{}", platform_device_id));
        let response = self
            .send_authed(|token| {
                self.http_client
                    .delete(&url)
                    .header("X-Authorization", format!("Bearer {}", token))
            })
            .await;

        match response {
            Some(response) if response.status().is_success() => true,
            Some(response) => {
                warn!(
                    "Platform device delete for {} failed: status {}",
                    platform_device_id,
                    response.status()
                );
                false
            }
            None => false,
        }
    }

    /// Fetch historical telemetry for one metric as ordered
    /// (timestamp, value) pairs. Empty on any failure.
    pub async fn fetch_telemetry_history(
        &self,
        platform_device_id: &str,
        metric: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Vec<(i64, String)> {
        let url = self.api_url(&format!(
            "/api/plugins/telemetry/DEVICE/{}/values/timeseries?keys={}&startTs={}&endTs={}",
            platform_device_id,
            urlencoding::encode(metric),
            from_ts,
            to_ts
        ));
        let Some(response) = self
            .send_authed(|token| {
                self.http_client
                    .get(&url)
                    .header("X-Authorization", format!("Bearer {}", token))
            })
            .await
        else {
            return Vec::new();
        };

        if !response.status().is_success() {
            warn!(
                "Telemetry history fetch for {} failed: status {}",
                platform_device_id,
                response.status()
            );
            return Vec::new();
        }

        let parsed: JsonValue = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Undecodable telemetry history: {}", e);
                return Vec::new();
            }
        };

        Self::parse_timeseries(&parsed, metric)
    }

    /// Flatten a `{metric: [{ts, value}, ..]}` series into ordered pairs.
    fn parse_timeseries(payload: &JsonValue, metric: &str) -> Vec<(i64, String)> {
        let Some(samples) = payload.get(metric).and_then(JsonValue::as_array) else {
            return Vec::new();
        };

        let mut series: Vec<(i64, String)> = samples
            .iter()
            .filter_map(|sample| {
                let ts = sample.get("ts").and_then(JsonValue::as_i64)?;
                let value = match sample.get("value")? {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((ts, value))
            })
            .collect();
        series.sort_by_key(|(ts, _)| *ts);
        series
    }
}
