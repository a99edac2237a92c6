// HTTP REST gate driver
//
// STATUS is a GET against `/api/gate/status`; every other action is a
// POST of the command JSON to `/api/gate/command`. The controller's
// answer is `{ "status": "OPEN" | "CLOSED" | "ERROR", ... }`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::command::{DoorStatus, GateAction, GateCommand, GateProtocol, GateResponse};
use crate::driver::GateDriver;
use crate::error::Error;

const STATUS_PATH: &str = "api/gate/status";
const COMMAND_PATH: &str = "api/gate/command";

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Driver for gates fronted by an HTTP controller.
pub struct HttpDriver {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpDriver {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Join a relative path onto the base URL, tolerating a base without
    /// a trailing slash.
    fn url(&self, path: &str) -> Result<Url, Error> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let p = format!("{}/", base.path());
            base.set_path(&p);
        }
        Ok(base.join(path)?)
    }

    fn interpret(action: GateAction, body: &str) -> Result<GateResponse, Error> {
        let parsed: Option<StatusBody> = if body.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(body).map_err(|e| {
                Error::protocol(format!("response is not gate JSON: {e}"))
            })?)
        };

        let reported = parsed.as_ref().and_then(|b| b.status.as_deref());
        let status = match reported {
            Some(s) => s
                .parse::<DoorStatus>()
                .map_err(|_| Error::protocol(format!("unknown gate status '{s}'")))?,
            None => action
                .implied_status()
                .ok_or_else(|| Error::protocol(format!("{action} response carried no status")))?,
        };

        let raw = parsed
            .and_then(|b| b.message)
            .unwrap_or_else(|| body.to_owned());
        Ok(GateResponse { status, raw })
    }
}

#[async_trait]
impl GateDriver for HttpDriver {
    fn protocol(&self) -> GateProtocol {
        GateProtocol::Http
    }

    async fn send(
        &self,
        gate_id: &str,
        command: &GateCommand,
        timeout: Duration,
    ) -> Result<GateResponse, Error> {
        let request = if command.action == GateAction::Status {
            self.http.get(self.url(STATUS_PATH)?)
        } else {
            self.http.post(self.url(COMMAND_PATH)?).json(command)
        };

        debug!(gate_id, action = %command.action, base = %self.base_url, "http send");
        let resp = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout { timeout }
            } else {
                Error::Http(e)
            }
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout { timeout }
            } else {
                Error::Http(e)
            }
        })?;
        trace!(gate_id, %status, body = %body, "http response");

        if !status.is_success() {
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Self::interpret(command.action, &body)
    }
}
