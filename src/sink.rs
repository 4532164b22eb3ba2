use tracing::warn;

use crate::bus::BusSink;
use crate::errors::{AlarmError, Result};
use crate::http::HttpSink;

/// A destination alarm payloads can be delivered to
#[derive(Clone)]
pub enum AlarmSink {
    Bus(BusSink),
    Http(HttpSink),
}

impl AlarmSink {
    pub fn name(&self) -> &'static str {
        match self {
            AlarmSink::Bus(_) => "bus",
            AlarmSink::Http(_) => "http",
        }
    }

    pub async fn deliver(&self, payload: &[u8]) -> Result<()> {
        match self {
            AlarmSink::Bus(sink) => sink.send(payload).await,
            AlarmSink::Http(sink) => sink.post(payload).await,
        }
    }
}

/// Try each sink in order and stop at the first success
///
/// Each sink gets exactly one attempt. When all fail, the error lists
/// every failure in attempt order.
pub async fn deliver_first(sinks: &[AlarmSink], payload: &[u8]) -> Result<()> {
    let mut failures = Vec::with_capacity(sinks.len());

    for sink in sinks {
        match sink.deliver(payload).await {
            Ok(()) => {
                if !failures.is_empty() {
                    warn!(
                        sink = sink.name(),
                        failed = failures.len(),
                        "Alarm delivered after fallback"
                    );
                }
                return Ok(());
            }
            Err(e) => {
                warn!(sink = sink.name(), error = %e, "Alarm sink failed");
                failures.push(e);
            }
        }
    }

    Err(AlarmError::Delivery(failures))
}
