use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::time;

/// Timeout applied to every controller call. Exceeding it surfaces
/// [ApiErr::Timeout] to the caller; the dns data path is never blocked
/// longer than this on control-plane trouble.
const CONTROLLER_TIMEOUT: time::Duration = time::Duration::from_secs(1);

/// Errors surfaced by the northbound client. Calls are never retried,
/// the caller decides whether a failure matters.
#[derive(Debug)]
pub enum ApiErr {
    Timeout,
    Transport(String),
    Status(u16),
    Decode(String),
}

impl Display for ApiErr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ApiErr::Timeout => write!(f, "controller request timed out"),
            ApiErr::Transport(msg) => write!(f, "controller unreachable: {}", msg),
            ApiErr::Status(code) => write!(f, "controller replied with status {}", code),
            ApiErr::Decode(msg) => write!(f, "undecodable controller reply: {}", msg),
        }
    }
}

impl From<reqwest::Error> for ApiErr {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiErr::Timeout
        } else if err.is_decode() {
            ApiErr::Decode(err.to_string())
        } else {
            ApiErr::Transport(err.to_string())
        }
    }
}

/// One entry of a batched controller operation, applied in order by the
/// controller: `{type: "flow"|"route", action: "block"|"remove", ips, [nexthop]}`.
#[derive(Debug, Clone, Serialize)]
pub struct FlowCommand {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub ips: Vec<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nexthop: Option<Ipv4Addr>,
}

/// Thin blocking HTTP client for the SDN controller northbound API. All
/// calls are idempotent from this side: the controller decides whether
/// any state actually changed.
pub struct NbApiClient {
    controller_url: String,
    client: reqwest::blocking::Client,
}

impl NbApiClient {
    pub fn new(controller_url: &str) -> Result<NbApiClient, ApiErr> {
        let client = reqwest::blocking::Client::builder()
            .timeout(CONTROLLER_TIMEOUT)
            .build()?;
        Ok(NbApiClient {
            controller_url: controller_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Install a route towards `nexthop` plus the matching flows for the
    /// passed destination addresses.
    pub fn route(&self, nexthop: Ipv4Addr, ips: &[Ipv4Addr]) -> Result<Value, ApiErr> {
        self.post("/api/route", &json!({ "nexthop": nexthop, "ips": ips }))
    }

    /// Install drop flows for the passed destination addresses.
    pub fn block(&self, ips: &[Ipv4Addr]) -> Result<Value, ApiErr> {
        self.post("/api/block", &json!({ "ips": ips }))
    }

    pub fn remove_flow(&self, ips: &[Ipv4Addr]) -> Result<Value, ApiErr> {
        self.delete("/api/remove/flow", &json!({ "ips": ips }))
    }

    pub fn remove_route(&self, ips: &[Ipv4Addr]) -> Result<Value, ApiErr> {
        self.delete("/api/remove/route", &json!({ "ips": ips }))
    }

    /// Apply an ordered list of flow/route commands in a single call.
    pub fn batch(&self, commands: &[FlowCommand]) -> Result<Value, ApiErr> {
        self.post("/api/batch", &json!({ "commands": commands }))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, ApiErr> {
        let url = format!("{}{}", self.controller_url, path);
        let response = self.client.post(url).json(body).send()?;
        read_json(response)
    }

    fn delete(&self, path: &str, body: &Value) -> Result<Value, ApiErr> {
        let url = format!("{}{}", self.controller_url, path);
        let response = self.client.delete(url).json(body).send()?;
        read_json(response)
    }
}

fn read_json(response: reqwest::blocking::Response) -> Result<Value, ApiErr> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiErr::Status(status.as_u16()));
    }
    Ok(response.json()?)
}
