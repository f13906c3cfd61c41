//! RFC 5424 syslog sink
//!
//! Entries are formatted directly; the format is small enough that no
//! syslog crate is needed. UDP sends one datagram per entry, TCP opens a
//! connection per entry and uses newline framing (RFC 5425).

use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use super::{AuditSink, LogEntry};
use crate::config::SyslogConfig;
use crate::error::{Error, Result};

/// Record fields copied into the structured-data element, in order
const SD_FIELDS: &[&str] = &[
    "id",
    "request_id",
    "method",
    "path",
    "status_code",
    "response_time_ms",
    "ip_address",
    "user_id",
    "memory_peak_mb",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Udp,
    Tcp,
}

/// Sink sending each entry to a syslog collector
#[derive(Clone, Debug)]
pub struct SyslogSink {
    address: SocketAddr,
    facility: u8,
    app_name: String,
    transport: Transport,
}

impl SyslogSink {
    /// Create a sink from configuration
    pub fn new(config: &SyslogConfig) -> Result<Self> {
        let address: SocketAddr = config.address.parse().map_err(|e| {
            Error::sink("syslog", format!("invalid address '{}': {}", config.address, e))
        })?;

        let transport = match config.transport.as_str() {
            "tcp" => Transport::Tcp,
            _ => Transport::Udp,
        };

        Ok(Self {
            address,
            facility: config.facility,
            app_name: config
                .app_name
                .clone()
                .unwrap_or_else(|| "request-audit".to_string()),
            transport,
        })
    }

    /// Format an entry as an RFC 5424 message
    ///
    /// `<PRI>1 TIMESTAMP HOSTNAME APP-NAME - MSGID [SD] MSG`
    fn format_rfc5424(&self, entry: &LogEntry) -> String {
        let pri = (self.facility as u16) * 8 + entry.level.as_syslog_severity() as u16;
        let timestamp = entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ");

        let hostname = match entry.field("service_name") {
            Some(Value::String(name)) if !name.is_empty() => name.as_str(),
            _ => "-",
        };

        let sd_params: Vec<String> = SD_FIELDS
            .iter()
            .filter_map(|key| {
                let value = match entry.field(key)? {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some(format!("{}=\"{}\"", key, escape_sd_value(&value)))
            })
            .collect();

        let structured_data = if sd_params.is_empty() {
            "-".to_string()
        } else {
            format!("[audit@49610 {}]", sd_params.join(" "))
        };

        format!(
            "<{}>1 {} {} {} - {} {} {}",
            pri,
            timestamp,
            hostname,
            self.app_name,
            entry.channel.name(),
            structured_data,
            entry.message
        )
    }
}

#[async_trait]
impl AuditSink for SyslogSink {
    async fn write(&self, entry: &LogEntry) -> Result<()> {
        let message = self.format_rfc5424(entry);

        match self.transport {
            Transport::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.send_to(message.as_bytes(), self.address).await?;
            }
            Transport::Tcp => {
                let mut stream = TcpStream::connect(self.address).await?;
                stream.write_all(format!("{}\n", message).as_bytes()).await?;
            }
        }

        Ok(())
    }
}

/// Escape special characters in structured data values per RFC 5424
fn escape_sd_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(']', "\\]")
}
