//! Captive-portal web form.
//!
//! The portal runs on the tokio runtime while the supervisor owns its state
//! on a blocking thread. Handlers never touch the supervisor directly: each
//! request travels over an mpsc channel as a [`PortalRequest`] with a
//! oneshot reply, and the supervisor loop answers it between ticks.
//!
//! # Endpoints
//!
//! - `GET /` - configuration form, pre-filled with the stored values
//! - `POST /` - submit the form (`application/x-www-form-urlencoded`)
//! - `GET /status` - JSON view of the supervisor state

use std::fmt::Write as _;
use std::net::SocketAddr;

use ancs2mqtt_core::config::RESET_SELECTED;
use ancs2mqtt_core::{
    BrokerSession, Clock, ConfigError, ConfigForm, Configuration, ConnectionState,
    ConnectionSupervisor, DeviceControl, NetworkLayer, StorageRegion,
};
use anyhow::anyhow;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Json},
    routing::get,
    Form, Router,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Snapshot of the supervisor shown by the portal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalView {
    pub name: String,
    pub state: ConnectionState,
    pub restart_pending: bool,
    #[serde(skip)]
    pub form: ConfigForm,
}

/// A request from the portal to the supervisor owner.
#[derive(Debug)]
pub enum PortalRequest {
    View {
        reply: oneshot::Sender<PortalView>,
    },
    Submit {
        form: ConfigForm,
        reply: oneshot::Sender<Result<Configuration, ConfigError>>,
    },
}

impl PortalRequest {
    /// Answer the request against the supervisor.
    pub fn answer<S, B, N, C, D>(self, supervisor: &mut ConnectionSupervisor<S, B, N, C, D>)
    where
        S: StorageRegion,
        B: BrokerSession,
        N: NetworkLayer,
        C: Clock,
        D: DeviceControl,
    {
        match self {
            PortalRequest::View { reply } => {
                let view = PortalView {
                    name: supervisor.name().to_string(),
                    state: supervisor.state(),
                    restart_pending: supervisor.is_restart_pending(),
                    form: supervisor.portal_form(),
                };
                let _ = reply.send(view);
            }
            PortalRequest::Submit { form, reply } => {
                let result = supervisor.submit_config(&form);
                if let Err(e) = &result {
                    info!("Portal submission rejected: {}", e);
                }
                let _ = reply.send(result);
            }
        }
    }
}

/// Create the portal channel.
pub fn channel(capacity: usize) -> (PortalHandle, PortalInbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (PortalHandle { tx }, PortalInbox { rx })
}

/// Sending side, cloned into every handler.
#[derive(Debug, Clone)]
pub struct PortalHandle {
    tx: mpsc::Sender<PortalRequest>,
}

impl PortalHandle {
    pub async fn view(&self) -> anyhow::Result<PortalView> {
        let (reply, rx) = oneshot::channel();
        self.send(PortalRequest::View { reply }).await?;
        Ok(rx.await?)
    }

    pub async fn submit(&self, form: ConfigForm) -> anyhow::Result<Result<Configuration, ConfigError>> {
        let (reply, rx) = oneshot::channel();
        self.send(PortalRequest::Submit { form, reply }).await?;
        Ok(rx.await?)
    }

    async fn send(&self, request: PortalRequest) -> anyhow::Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("supervisor is not running"))
    }
}

/// Receiving side, drained by the supervisor loop.
#[derive(Debug)]
pub struct PortalInbox {
    rx: mpsc::Receiver<PortalRequest>,
}

impl PortalInbox {
    /// Answer every queued request without blocking. Returns how many were handled.
    pub fn serve_pending<S, B, N, C, D>(
        &mut self,
        supervisor: &mut ConnectionSupervisor<S, B, N, C, D>,
    ) -> usize
    where
        S: StorageRegion,
        B: BrokerSession,
        N: NetworkLayer,
        C: Clock,
        D: DeviceControl,
    {
        let mut handled = 0;
        while let Ok(request) = self.rx.try_recv() {
            request.answer(supervisor);
            handled += 1;
        }
        handled
    }
}

/// Build the portal router.
pub fn router(portal: PortalHandle) -> Router {
    Router::new()
        .route("/", get(show_form).post(submit_form))
        .route("/status", get(status))
        .with_state(portal)
}

/// Bind `addr` and serve the portal until the listener fails.
pub async fn serve(addr: SocketAddr, portal: PortalHandle) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Configuration portal listening on {}", addr);
    axum::serve(listener, router(portal)).await?;
    Ok(())
}

fn unavailable(e: anyhow::Error) -> StatusCode {
    warn!("Portal request failed: {}", e);
    StatusCode::SERVICE_UNAVAILABLE
}

/// GET /
async fn show_form(State(portal): State<PortalHandle>) -> Result<Html<String>, StatusCode> {
    let view = portal.view().await.map_err(unavailable)?;
    Ok(Html(render_form(&view.name, &view.form, None)))
}

/// POST /
async fn submit_form(
    State(portal): State<PortalHandle>,
    Form(form): Form<ConfigForm>,
) -> Result<(StatusCode, Html<String>), StatusCode> {
    debug!(device_id = %form.device_id, host = %form.host, "Portal submission");
    let result = portal.submit(form.clone()).await.map_err(unavailable)?;

    match result {
        Ok(config) => Ok((StatusCode::OK, Html(render_saved(&config)))),
        Err(ConfigError::Invalid(e)) => {
            let view = portal.view().await.map_err(unavailable)?;
            let page = render_form(&view.name, &form, Some((e.field, e.message)));
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page)))
        }
        Err(ConfigError::Storage(e)) => {
            warn!("Configuration could not be stored: {}", e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render_message("Saving failed", &e.to_string())),
            ))
        }
    }
}

/// GET /status
async fn status(State(portal): State<PortalHandle>) -> Result<Json<PortalView>, StatusCode> {
    portal.view().await.map(Json).map_err(unavailable)
}

struct Field {
    id: &'static str,
    label: &'static str,
    kind: &'static str,
}

const FIELDS: &[Field] = &[
    Field { id: "ssid", label: "WiFi SSID", kind: "text" },
    Field { id: "wifipass", label: "WiFi password", kind: "password" },
    Field { id: "iosd", label: "Device ID", kind: "text" },
    Field { id: "mqth", label: "MQTT server", kind: "text" },
    Field { id: "mqtp", label: "MQTT port", kind: "number" },
    Field { id: "mqtu", label: "MQTT user", kind: "text" },
    Field { id: "mqtP", label: "MQTT password", kind: "password" },
    Field { id: "mqtx", label: "Topic prefix", kind: "text" },
];

fn field_value<'a>(form: &'a ConfigForm, id: &str) -> &'a str {
    match id {
        "ssid" => &form.ssid,
        "wifipass" => &form.wifi_password,
        "iosd" => &form.device_id,
        "mqth" => &form.host,
        "mqtp" => &form.port,
        "mqtu" => &form.username,
        "mqtP" => &form.password,
        "mqtx" => &form.topic_prefix,
        _ => "",
    }
}

fn render_form(name: &str, form: &ConfigForm, error: Option<(&str, &str)>) -> String {
    let mut body = String::from("<form method=\"post\" action=\"/\">\n");

    for field in FIELDS {
        let _ = write!(
            body,
            "<label for=\"{id}\">{label}</label>\n<input type=\"{kind}\" id=\"{id}\" name=\"{id}\" value=\"{value}\">\n",
            id = field.id,
            label = field.label,
            kind = field.kind,
            value = escape_html(field_value(form, field.id)),
        );
        if let Some((_, message)) = error.filter(|(id, _)| *id == field.id) {
            let _ = writeln!(body, "<div class=\"error\">{}</div>", escape_html(message));
        }
    }

    let checked = if form.reset_requested() { " checked" } else { "" };
    let _ = write!(
        body,
        "<label><input type=\"checkbox\" name=\"rset\" value=\"{}\"{}> Reset configuration on next start</label>\n\
         <button type=\"submit\">Save</button>\n</form>\n",
        RESET_SELECTED, checked
    );

    page(name, &body)
}

fn render_saved(config: &Configuration) -> String {
    render_message(
        "Configuration saved",
        &format!(
            "Device {} will connect to {}:{} after the restart.",
            config.device_id, config.host, config.port
        ),
    )
}

fn render_message(title: &str, text: &str) -> String {
    page(title, &format!("<p>{}</p>\n", escape_html(text)))
}

fn page(title: &str, body: &str) -> String {
    let title = escape_html(title);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n"
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
