use std::io::{self, BufRead, Stdout, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::PanelError;

use super::{BusMessage, MessageBus};

/// Newline-delimited JSON envelopes, `{"topic": ..., "payload": ...}`.
pub struct JsonLinesBus<W>
where
    W: Write + Send,
{
    out: Arc<Mutex<W>>,
}

impl<W> Clone for JsonLinesBus<W>
where
    W: Write + Send,
{
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W> JsonLinesBus<W>
where
    W: Write + Send,
{
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }
}

impl<W> MessageBus for JsonLinesBus<W>
where
    W: Write + Send,
{
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let line = serde_json::to_string(&json!({ "topic": topic, "payload": payload }))?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|err| PanelError::BusDelivery {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

/// Publishes on stdout and reads inbound messages from stdin on a
/// background thread. The receiver disconnects when stdin closes.
pub fn start() -> Result<(JsonLinesBus<Stdout>, Receiver<BusMessage>)> {
    let (tx, rx) = crossbeam_channel::unbounded();

    thread::Builder::new()
        .name("bus-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            read_loop(stdin.lock(), &tx);
            info!("bus input closed");
        })
        .context("failed to spawn bus reader")?;

    Ok((JsonLinesBus::new(io::stdout()), rx))
}

pub fn read_loop<R>(reader: R, tx: &Sender<BusMessage>)
where
    R: BufRead,
{
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to read bus input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BusMessage>(&line) {
            Ok(message) => {
                debug!(topic = %message.topic, "bus message received");
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "skipping malformed bus message"),
        }
    }
}
