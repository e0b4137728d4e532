//! Translation between DevTools payloads and [`ContextEvent`]s.
//!
//! Everything here is free of protocol types so it can be tested
//! without a browser; `context.rs` unpacks the CDP events and feeds the
//! plain values in.

use std::collections::HashMap;

use renderq_core::{Completion, Headers, ResponseDetails};
use renderq_engine::ContextEvent;
use serde::Deserialize;
use serde_json::{Map, Value};

const CONTENT_SCRIPT: &str = include_str!("../assets/content_script.js");

/// The script installed into every document of a render page, wired to
/// the page's completion binding.
pub fn content_script(binding: &str) -> String {
    CONTENT_SCRIPT.replace("__BINDING__", binding)
}

/// Expression that runs the completion step inside the page.
pub fn completion_call(fetch_code: Option<&str>) -> Result<String, serde_json::Error> {
    Ok(format!(
        "window.__renderq.runCompletion({})",
        serde_json::to_string(&fetch_code)?
    ))
}

/// New-document script that hands `script` to the content script.
///
/// New-document scripts run in every frame; the injection only runs in
/// the top one.
pub fn injection_call(script: &str) -> Result<String, serde_json::Error> {
    Ok(format!(
        "if (window === window.top) {{ window.__renderq.runInjection({}); }}",
        serde_json::to_string(script)?
    ))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BindingPayload {
    Failed { error: String },
    Done(Completion),
}

/// Decode what the content script sent through the binding.
pub fn parse_binding_payload(payload: &str) -> ContextEvent {
    match serde_json::from_str::<BindingPayload>(payload) {
        Ok(BindingPayload::Done(completion)) => ContextEvent::Completion(completion),
        Ok(BindingPayload::Failed { error }) => ContextEvent::Failed(error),
        Err(e) => ContextEvent::Failed(format!("invalid completion signal: {e}")),
    }
}

/// CDP sends headers as a JSON object with repeated values joined by
/// newlines.
pub fn headers_from_cdp(value: &Value) -> Headers {
    let Some(object) = value.as_object() else {
        return Headers::new();
    };
    object
        .iter()
        .filter_map(|(name, value)| {
            let value = value.as_str()?;
            Some((
                name.clone(),
                value.split('\n').map(str::to_string).collect(),
            ))
        })
        .collect()
}

pub fn headers_to_cdp(headers: &Headers) -> Value {
    let object: Map<String, Value> = headers
        .iter()
        .map(|(name, values)| (name.clone(), Value::String(values.join(", "))))
        .collect();
    Value::Object(object)
}

fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// A response as reported by the network domain.
#[derive(Debug, Clone, Default)]
pub struct ObservedResponse {
    pub url: String,
    pub status: i64,
    pub headers: Headers,
    pub mime_type: String,
}

#[derive(Debug)]
struct PendingRequest {
    original_url: String,
    url: String,
    method: String,
    referrer: Option<String>,
}

/// Main-frame document requests of one page, keyed by request id.
///
/// A redirect keeps its request id, so the chain's first URL is
/// remembered as the original URL of every later hop.
#[derive(Debug, Default)]
pub struct DocumentRequests {
    pending: HashMap<String, PendingRequest>,
}

impl DocumentRequests {
    /// A document request is about to be sent.
    ///
    /// When `redirected` is set this request replaces an earlier hop;
    /// the earlier hop's response and the redirect are returned in the
    /// order they happened.
    pub fn will_send(
        &mut self,
        request_id: &str,
        url: &str,
        method: &str,
        request_headers: &Headers,
        redirected: Option<ObservedResponse>,
    ) -> Vec<ContextEvent> {
        let referrer = header(request_headers, "Referer").map(str::to_string);

        let Some(redirected) = redirected else {
            self.pending.insert(
                request_id.to_string(),
                PendingRequest {
                    original_url: url.to_string(),
                    url: url.to_string(),
                    method: method.to_string(),
                    referrer,
                },
            );
            return Vec::new();
        };

        let mut events = Vec::with_capacity(2);
        let from = redirected.url.clone();
        if let Some(details) = self.details(request_id, redirected) {
            events.push(ContextEvent::Response(details));
        }
        events.push(ContextEvent::Redirect {
            from: from.clone(),
            to: url.to_string(),
        });

        let original_url = self
            .pending
            .get(request_id)
            .map(|p| p.original_url.clone())
            .unwrap_or(from);
        self.pending.insert(
            request_id.to_string(),
            PendingRequest {
                original_url,
                url: url.to_string(),
                method: method.to_string(),
                referrer,
            },
        );
        events
    }

    /// The final response for a document request arrived.
    pub fn response(&mut self, request_id: &str, response: ObservedResponse) -> Option<ContextEvent> {
        let details = self.details(request_id, response);
        self.pending.remove(request_id);
        details.map(ContextEvent::Response)
    }

    /// A request that never got a response.
    pub fn forget(&mut self, request_id: &str) {
        self.pending.remove(request_id);
    }

    fn details(&self, request_id: &str, response: ObservedResponse) -> Option<ResponseDetails> {
        let pending = self.pending.get(request_id)?;
        let content_type = header(&response.headers, "Content-Type")
            .map(str::to_string)
            .or_else(|| (!response.mime_type.is_empty()).then(|| response.mime_type.clone()));

        Some(ResponseDetails {
            url: if response.url.is_empty() {
                pending.url.clone()
            } else {
                response.url
            },
            original_url: pending.original_url.clone(),
            status_code: u16::try_from(response.status).unwrap_or_default(),
            request_method: pending.method.clone(),
            referrer: pending.referrer.clone(),
            headers: response.headers,
            content_type,
        })
    }
}
