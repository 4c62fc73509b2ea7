use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use atelier_contracts::apps::{AppEndpoints, SchemaKind};
use serde_json::Value;

use crate::transport::{AppChannel, AppTransport};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentRequest {
    pub url: String,
    pub payload: Value,
    pub caller_id: String,
}

/// In-memory transport: documents and resources keyed by URL, one scripted
/// reply per channel URL.
#[derive(Default)]
pub(crate) struct FakeTransport {
    documents: HashMap<String, Value>,
    resources: HashMap<String, Vec<u8>>,
    replies: HashMap<String, std::result::Result<Value, String>>,
    refused_channels: HashSet<String>,
    sent: Arc<Mutex<Vec<SentRequest>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(
        mut self,
        address: &str,
        manifest: Value,
        input: Value,
        output: Value,
        reply: std::result::Result<Value, String>,
    ) -> Self {
        let endpoints = AppEndpoints::new(address, true);
        self.documents.insert(endpoints.manifest_url(), manifest);
        self.documents
            .insert(endpoints.schema_url(SchemaKind::Input), input);
        self.documents
            .insert(endpoints.schema_url(SchemaKind::Output), output);
        self.replies.insert(endpoints.channel_url(), reply);
        self
    }

    pub fn without_document(mut self, url: &str) -> Self {
        self.documents.remove(url);
        self
    }

    pub fn with_resource(mut self, url: &str, bytes: &[u8]) -> Self {
        self.resources.insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn refusing_channel(mut self, address: &str) -> Self {
        self.refused_channels
            .insert(AppEndpoints::new(address, true).channel_url());
        self
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<SentRequest>>> {
        Arc::clone(&self.sent)
    }

    pub fn closed_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }
}

impl AppTransport for FakeTransport {
    fn fetch_document(&self, url: &str) -> Result<Value> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("request to {url} failed (404)"))
    }

    fn fetch_resource(&self, url: &str) -> Result<Vec<u8>> {
        self.resources
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("resource {url} not found"))
    }

    fn open_channel(&self, url: &str) -> Result<Box<dyn AppChannel>> {
        if self.refused_channels.contains(url) {
            bail!("connection refused ({url})");
        }
        let reply = self
            .replies
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("failed to connect channel {url}"))?;
        Ok(Box::new(FakeChannel {
            url: url.to_string(),
            reply,
            pending: None,
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeChannel {
    url: String,
    reply: std::result::Result<Value, String>,
    pending: Option<String>,
    sent: Arc<Mutex<Vec<SentRequest>>>,
    closed: Arc<AtomicUsize>,
}

impl AppChannel for FakeChannel {
    fn execute(&mut self, payload: &Value, caller_id: &str) -> Result<String> {
        let mut sent = self.sent.lock().map_err(|_| anyhow!("sent log poisoned"))?;
        sent.push(SentRequest {
            url: self.url.clone(),
            payload: payload.clone(),
            caller_id: caller_id.to_string(),
        });
        let handle = format!("rid-{}", sent.len());
        self.pending = Some(handle.clone());
        Ok(handle)
    }

    fn get_response(&mut self, handle: &str) -> Result<Value> {
        if self.pending.as_deref() != Some(handle) {
            bail!("unknown request handle {handle}");
        }
        self.pending = None;
        self.reply.clone().map_err(|message| anyhow!(message))
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
