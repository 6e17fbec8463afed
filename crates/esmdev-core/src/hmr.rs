//! HMR wire protocol, broadcast channel and browser client runtime.
//!
//! Messages are JSON objects tagged by `type`:
//!
//! - server → client: `connected`, `reload`, `update`, `error`
//! - client → server: `hotAccept`, `invalidate`

use crate::graph::{Invalidation, ModuleKey};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// URL of the injected HMR client module.
pub const CLIENT_PUBLIC_PATH: &str = "/_hmr_client.js";

/// Namespace the HMR client module lives in.
pub const CLIENT_NAMESPACE: &str = "hmr-client";

/// Path of the HMR WebSocket endpoint.
pub const HMR_SOCKET_PATH: &str = "/__hmr";

/// Message pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HmrPayload {
    /// Sent once after the socket opens.
    Connected,
    /// Full page reload.
    Reload,
    /// Re-import the listed accepting modules.
    Update { updates: Vec<ModuleUpdate> },
    /// Build error to show in the overlay.
    Error { message: String },
}

/// One module to re-import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleUpdate {
    /// Module URL.
    pub path: String,
    /// Cache-busting timestamp in milliseconds.
    pub timestamp: u64,
}

/// Message received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// The module at `path` registered a hot-accept handler.
    HotAccept { path: String },
    /// The module at `path` could not apply an update.
    Invalidate { path: String },
}

impl HmrPayload {
    /// Serialize for the wire.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"reload"}"#.to_string())
    }

    /// Payload for an invalidation result; `url_of` maps graph keys to URLs.
    pub fn from_invalidation(
        invalidation: &Invalidation,
        timestamp: u64,
        url_of: impl Fn(&ModuleKey) -> String,
    ) -> Self {
        match invalidation {
            Invalidation::FullReload => Self::Reload,
            Invalidation::Boundaries(keys) => Self::Update {
                updates: keys
                    .iter()
                    .map(|k| ModuleUpdate {
                        path: url_of(k),
                        timestamp,
                    })
                    .collect(),
            },
        }
    }
}

impl ClientMessage {
    /// Parse a client text frame; unknown messages yield `None`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Fan-out of HMR payloads to every connected client.
#[derive(Debug, Clone)]
pub struct HmrBroadcaster {
    tx: broadcast::Sender<HmrPayload>,
}

impl HmrBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send to all current subscribers. Returns how many received it.
    pub fn send(&self, payload: HmrPayload) -> usize {
        match &payload {
            HmrPayload::Update { updates } => {
                info!(modules = updates.len(), "hmr update");
            }
            HmrPayload::Reload => info!("page reload"),
            _ => debug!(?payload, "hmr broadcast"),
        }
        // No subscribers is fine: nobody has the page open
        self.tx.send(payload).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HmrPayload> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for HmrBroadcaster {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Browser runtime served at [`CLIENT_PUBLIC_PATH`].
///
/// Connects to [`HMR_SOCKET_PATH`] on the serving host and exports
/// `createHotContext`, which backs `import.meta.hot`.
#[must_use]
pub fn client_runtime() -> String {
    CLIENT_RUNTIME.replace("__HMR_SOCKET_PATH__", HMR_SOCKET_PATH)
}

/// Script tag injected into served HTML.
#[must_use]
pub fn client_script_tag() -> String {
    format!(r#"<script type="module" src="{CLIENT_PUBLIC_PATH}"></script>"#)
}

const CLIENT_RUNTIME: &str = r#"
// esmdev HMR client
const hotModules = new Map();
const disposers = new Map();
const hotData = new Map();
const pending = [];

const protocol = location.protocol === 'https:' ? 'wss' : 'ws';
const socket = new WebSocket(`${protocol}://${location.host}__HMR_SOCKET_PATH__`);
let connected = false;

function send(message) {
  const text = JSON.stringify(message);
  if (socket.readyState === WebSocket.OPEN) {
    socket.send(text);
  } else {
    pending.push(text);
  }
}

socket.addEventListener('open', () => {
  connected = true;
  while (pending.length) socket.send(pending.shift());
});

socket.addEventListener('message', ({ data }) => {
  const msg = JSON.parse(data);
  switch (msg.type) {
    case 'connected':
      console.log('[esmdev] connected.');
      break;
    case 'reload':
      console.log('[esmdev] reloading page.');
      location.reload();
      break;
    case 'update':
      msg.updates.forEach(applyUpdate);
      break;
    case 'error':
      showError(msg.message);
      break;
  }
});

socket.addEventListener('close', () => {
  if (!connected) return;
  console.log('[esmdev] server connection lost, waiting to reload...');
  setTimeout(() => location.reload(), 1000);
});

async function applyUpdate({ path, timestamp }) {
  const mod = hotModules.get(path);
  if (!mod) {
    location.reload();
    return;
  }
  const dispose = disposers.get(path);
  if (dispose) dispose(hotData.get(path));
  try {
    hideError();
    const fresh = await import(`${path}?t=${timestamp}`);
    mod.callbacks.forEach((cb) => cb(fresh));
    console.log(`[esmdev] hot updated: ${path}`);
  } catch (err) {
    console.error(`[esmdev] failed to update ${path}`, err);
    location.reload();
  }
}

function showError(message) {
  let overlay = document.getElementById('__esmdev_error');
  if (!overlay) {
    overlay = document.createElement('pre');
    overlay.id = '__esmdev_error';
    overlay.style.cssText =
      'position:fixed;inset:0;margin:0;padding:32px;background:rgba(0,0,0,.9);' +
      'color:#ff5555;font:14px monospace;white-space:pre-wrap;z-index:99999';
    document.body.appendChild(overlay);
  }
  overlay.textContent = message;
  overlay.style.display = 'block';
}

function hideError() {
  const overlay = document.getElementById('__esmdev_error');
  if (overlay) overlay.style.display = 'none';
}

export function createHotContext(ownerPath) {
  if (!hotData.has(ownerPath)) hotData.set(ownerPath, {});
  return {
    get data() {
      return hotData.get(ownerPath);
    },
    accept(cb) {
      const mod = hotModules.get(ownerPath) || { callbacks: [] };
      if (typeof cb === 'function') mod.callbacks.push(cb);
      hotModules.set(ownerPath, mod);
      send({ type: 'hotAccept', path: ownerPath });
    },
    dispose(cb) {
      disposers.set(ownerPath, cb);
    },
    invalidate() {
      send({ type: 'invalidate', path: ownerPath });
      location.reload();
    },
  };
}
"#;
