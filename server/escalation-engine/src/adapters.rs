//! HTTP-backed channel adapters.
//!
//! - `WebhookAdapter` posts the incident to the facility's own endpoint and
//!   reads an explicit accept/decline from the response body.
//! - `RelayAdapter` hands a message to a messaging relay (SMS, WhatsApp, voice,
//!   email). Relays have no acknowledgement path, so a successful send is
//!   reported as `declined`; delivery is never treated as acceptance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::{ChannelAdapter, ChannelOutcome, ChannelSet};
use crate::types::{ChannelKind, Facility, Incident};

/// Body posted to a facility webhook.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
  facility_id: &'a str,
  incident: &'a Incident,
}

/// Webhook reply. Either form counts as affirmative:
/// `{"accepted": true}` or `{"status": "accepted"}`.
#[derive(Debug, Default, Deserialize)]
struct WebhookReply {
  #[serde(default)]
  accepted: Option<bool>,
  #[serde(default)]
  status: Option<String>,
  #[serde(default)]
  reason: Option<String>,
}

impl WebhookReply {
  fn is_affirmative(&self) -> bool {
    self.accepted == Some(true)
      || self
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("accepted"))
  }
}

/// Interpret a webhook response body.
pub fn interpret_webhook_body(body: &str) -> ChannelOutcome {
  match serde_json::from_str::<WebhookReply>(body) {
    Ok(reply) if reply.is_affirmative() => ChannelOutcome::Accepted,
    Ok(reply) => ChannelOutcome::declined(
      reply
        .reason
        .or(reply.status)
        .unwrap_or_else(|| "not accepted".to_string()),
    ),
    Err(e) => ChannelOutcome::declined(format!("malformed reply: {}", e)),
  }
}

#[derive(Debug, Clone)]
pub struct WebhookAdapter {
  client: reqwest::Client,
}

impl WebhookAdapter {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
  fn kind(&self) -> ChannelKind {
    ChannelKind::Webhook
  }

  async fn attempt_notify(
    &self,
    facility: &Facility,
    incident: &Incident,
    timeout: Duration,
  ) -> ChannelOutcome {
    let Some(url) = facility.channels.address_for(ChannelKind::Webhook) else {
      return ChannelOutcome::error("no webhook endpoint");
    };

    let response = self
      .client
      .post(url)
      .timeout(timeout)
      .json(&WebhookPayload {
        facility_id: &facility.id,
        incident,
      })
      .send()
      .await;

    let response = match response {
      Ok(r) => r,
      Err(e) if e.is_timeout() => return ChannelOutcome::NoResponse,
      Err(e) => return ChannelOutcome::error(format!("transport: {}", e)),
    };

    let status = response.status();
    if !status.is_success() {
      return ChannelOutcome::declined(format!("http {}", status.as_u16()));
    }
    match response.text().await {
      Ok(body) => {
        debug!(facility_id = %facility.id, %status, "webhook replied");
        interpret_webhook_body(&body)
      }
      Err(e) if e.is_timeout() => ChannelOutcome::NoResponse,
      Err(e) => ChannelOutcome::error(format!("read body: {}", e)),
    }
  }
}

/// Message handed to a relay.
#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
  channel: ChannelKind,
  to: &'a str,
  message: String,
  incident_id: &'a str,
}

/// Fire-and-forget relay for channels without an acknowledgement path.
#[derive(Debug, Clone)]
pub struct RelayAdapter {
  kind: ChannelKind,
  endpoint: String,
  client: reqwest::Client,
}

impl RelayAdapter {
  pub fn new(kind: ChannelKind, endpoint: impl Into<String>, client: reqwest::Client) -> Self {
    Self {
      kind,
      endpoint: endpoint.into(),
      client,
    }
  }
}

/// Human-readable alert text sent over messaging channels.
pub fn alert_text(facility: &Facility, incident: &Incident) -> String {
  let need = incident
    .required_capability
    .as_deref()
    .map(|c| format!(" ({} care needed)", c))
    .unwrap_or_default();
  format!(
    "EMERGENCY for {}: patient {} at {:.5},{:.5}{}. HR {:.0} bpm, SpO2 {:.0}%. Incident {}.",
    facility.name,
    incident.device_id,
    incident.location.lat,
    incident.location.lon,
    need,
    incident.vitals.heart_rate,
    incident.vitals.spo2,
    incident.incident_id,
  )
}

#[async_trait]
impl ChannelAdapter for RelayAdapter {
  fn kind(&self) -> ChannelKind {
    self.kind
  }

  async fn attempt_notify(
    &self,
    facility: &Facility,
    incident: &Incident,
    timeout: Duration,
  ) -> ChannelOutcome {
    let Some(to) = facility.channels.address_for(self.kind) else {
      return ChannelOutcome::error(format!("no {} address", self.kind));
    };

    let message = RelayMessage {
      channel: self.kind,
      to,
      message: alert_text(facility, incident),
      incident_id: &incident.incident_id,
    };

    match self
      .client
      .post(&self.endpoint)
      .timeout(timeout)
      .json(&message)
      .send()
      .await
    {
      Ok(r) if r.status().is_success() => {
        ChannelOutcome::declined(format!("{} sent, no acknowledgement channel", self.kind))
      }
      Ok(r) => ChannelOutcome::error(format!("relay http {}", r.status().as_u16())),
      Err(e) if e.is_timeout() => ChannelOutcome::NoResponse,
      Err(e) => ChannelOutcome::error(format!("relay transport: {}", e)),
    }
  }
}

/// Relay endpoint variables, by channel.
pub const RELAY_ENV: [(ChannelKind, &str); 4] = [
  (ChannelKind::Sms, "SMS_RELAY_URL"),
  (ChannelKind::Whatsapp, "WHATSAPP_RELAY_URL"),
  (ChannelKind::Voice, "VOICE_RELAY_URL"),
  (ChannelKind::Email, "EMAIL_RELAY_URL"),
];

/// Webhook adapter plus one relay per configured `*_RELAY_URL` variable.
pub fn channel_set_from_env(client: reqwest::Client) -> ChannelSet {
  channel_set_from_lookup(client, |key| std::env::var(key).ok())
}

pub fn channel_set_from_lookup<F>(client: reqwest::Client, get: F) -> ChannelSet
where
  F: Fn(&str) -> Option<String>,
{
  let mut set = ChannelSet::new().with(Arc::new(WebhookAdapter::new(client.clone())));
  for (kind, key) in RELAY_ENV {
    if let Some(url) = get(key).filter(|u| !u.trim().is_empty()) {
      set.insert(Arc::new(RelayAdapter::new(kind, url.trim(), client.clone())));
    }
  }
  set
}
