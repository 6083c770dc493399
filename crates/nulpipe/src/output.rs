use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nulpipe_frame::Message;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

#[derive(Serialize)]
struct MessageOutput<'a> {
    seq: usize,
    size: usize,
    utf8: bool,
    payload: &'a str,
    timestamp: String,
}

/// Print one received message. `seq` counts from 1 within a command run.
pub fn print_message(message: &Message, seq: usize, format: OutputFormat) {
    let payload = message.text();
    match format {
        OutputFormat::Json => {
            println!("{}", render_json(message, seq));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "SIZE", "PAYLOAD"])
                .add_row(vec![seq.to_string(), message.len().to_string(), payload.into_owned()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("#{seq} size={} payload={payload}", message.len());
        }
        OutputFormat::Raw => {
            print_raw(message.as_bytes());
        }
    }
}

fn render_json(message: &Message, seq: usize) -> String {
    let payload = message.text();
    let out = MessageOutput {
        seq,
        size: message.len(),
        utf8: message.to_str().is_ok(),
        payload: &payload,
        timestamp: now_unix_seconds(),
    };
    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
}

/// Write payload bytes followed by a newline; raw output stays line-oriented.
pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
