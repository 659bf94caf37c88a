use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Something a running command reports on stdout.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    HubListening { address: String },
    Linked { self_id: String, hub: String },
    Listening { address: String },
    Attached { address: String },
    PeerHandshake { peer_id: String },
    PeerGoodbye { peer_id: String },
    Error { message: String, fatal: bool },
    Closed { state: String },
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::HubListening { .. } => "hub_listening",
            RelayEvent::Linked { .. } => "linked",
            RelayEvent::Listening { .. } => "listening",
            RelayEvent::Attached { .. } => "attached",
            RelayEvent::PeerHandshake { .. } => "peer_handshake",
            RelayEvent::PeerGoodbye { .. } => "peer_goodbye",
            RelayEvent::Error { .. } => "error",
            RelayEvent::Closed { .. } => "closed",
        }
    }

    fn detail(&self) -> String {
        match self {
            RelayEvent::HubListening { address }
            | RelayEvent::Listening { address }
            | RelayEvent::Attached { address } => address.clone(),
            RelayEvent::Linked { self_id, hub } => format!("{self_id} via {hub}"),
            RelayEvent::PeerHandshake { peer_id } | RelayEvent::PeerGoodbye { peer_id } => {
                peer_id.clone()
            }
            RelayEvent::Error { message, fatal } => {
                if *fatal {
                    format!("fatal: {message}")
                } else {
                    message.clone()
                }
            }
            RelayEvent::Closed { state } => state.clone(),
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    #[serde(flatten)]
    event: &'a RelayEvent,
    timestamp: String,
}

pub fn render_event(event: &RelayEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(&EventOutput {
            event,
            timestamp: now_unix_seconds(),
        })
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "DETAIL"])
                .add_row(vec![event.name().to_string(), event.detail()]);
            table.to_string()
        }
        OutputFormat::Pretty => format!("{}: {}", event.name(), event.detail()),
    }
}

pub fn print_event(event: &RelayEvent, format: OutputFormat) {
    println!("{}", render_event(event, format));
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
