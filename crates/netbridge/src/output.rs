use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use netbridge_frame::{opcode_name, Datagram};
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

/// Where a printed datagram came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Udp,
    Relay,
}

impl Origin {
    fn as_str(self) -> &'static str {
        match self {
            Origin::Udp => "udp",
            Origin::Relay => "relay",
        }
    }
}

#[derive(Serialize)]
struct DatagramOutput {
    origin: Origin,
    op: u16,
    op_name: &'static str,
    sender: u32,
    payload_size: usize,
    payload: String,
    timestamp_ms: u64,
}

impl DatagramOutput {
    fn new(datagram: &Datagram, origin: Origin) -> Self {
        Self {
            origin,
            op: datagram.op_code(),
            op_name: opcode_name(datagram.op_code()),
            sender: datagram.sender_id(),
            payload_size: datagram.payload().len(),
            payload: payload_preview(datagram.payload()),
            timestamp_ms: now_unix_millis(),
        }
    }
}

pub fn print_datagram(datagram: &Datagram, origin: Origin, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = DatagramOutput::new(datagram, origin);
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ORIGIN", "OP", "SENDER", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    origin.as_str().to_string(),
                    format!("{} ({})", datagram.op_code(), opcode_name(datagram.op_code())),
                    datagram.sender_id().to_string(),
                    datagram.payload().len().to_string(),
                    payload_preview(datagram.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} op={} ({}) sender={} size={} payload={}",
                origin.as_str(),
                datagram.op_code(),
                opcode_name(datagram.op_code()),
                datagram.sender_id(),
                datagram.payload().len(),
                payload_preview(datagram.payload())
            );
        }
        OutputFormat::Raw => {
            print_raw(datagram.payload());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_output_names_the_op_code() {
        let datagram = Datagram::new(42, 7, vec![b'h', b'i']);
        let out = DatagramOutput::new(&datagram, Origin::Relay);
        let value = serde_json::to_value(&out).expect("output should serialize");

        assert_eq!(value["origin"], "relay");
        assert_eq!(value["op"], 42);
        assert_eq!(value["op_name"], "APPLICATION");
        assert_eq!(value["sender"], 7);
        assert_eq!(value["payload"], "hi");
    }

    #[test]
    fn binary_payload_is_summarized() {
        assert_eq!(payload_preview(&[0xff, 0xfe, 0x00]), "<binary 3 bytes>");
        assert_eq!(payload_preview(b"text"), "text");
    }
}
