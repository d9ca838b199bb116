use crate::error::SyncError;
use crate::models::event::InboundEvent;
use crate::remote::{PushStream, PushTransport};
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;

// One line on the wire: {"event": "<name>", "data": <payload>}
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

pub struct JsonLinesTransport {
    addr: String,
}

impl JsonLinesTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl PushTransport for JsonLinesTransport {
    async fn connect(&self) -> Result<Box<dyn PushStream>, SyncError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| SyncError::Transport(format!("connect to {}: {}", self.addr, e)))?;
        info!("Push channel open to {}", self.addr);
        Ok(Box::new(JsonLinesStream {
            lines: BufReader::new(stream).lines(),
        }))
    }
}

struct JsonLinesStream {
    lines: Lines<BufReader<TcpStream>>,
}

#[async_trait]
impl PushStream for JsonLinesStream {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, SyncError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if let Some(event) = decode_line(&line)? {
                return Ok(Some(event));
            }
        }
    }
}

fn decode_line(line: &str) -> Result<Option<InboundEvent>, SyncError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let frame: Frame = serde_json::from_str(line)
        .map_err(|e| SyncError::MalformedPayload(format!("push frame: {}", e)))?;
    InboundEvent::from_wire(&frame.event, frame.data)
}
