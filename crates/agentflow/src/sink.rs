//! Delivers scheduler/heartbeat results to a chat. Channel adapters
//! (WhatsApp, Telegram) are an explicit external collaborator (spec.md §1),
//! so the only sink this binary owns on its own is one that logs — a real
//! deployment wires a channel-backed `ResultSink` in front of this process
//! instead.

use agentflow_protocol::OutboundPayload;
use async_trait::async_trait;
use tracing::info;

pub struct LoggingResultSink;

fn describe(payload: &OutboundPayload) -> String {
    match payload {
        OutboundPayload::Text { text } => text.clone(),
        OutboundPayload::Photo { file_path, .. } => format!("[photo] {file_path}"),
        OutboundPayload::Document { file_path, file_name, .. } => format!("[document {file_name}] {file_path}"),
    }
}

#[async_trait]
impl agentflow_scheduler::ResultSink for LoggingResultSink {
    async fn send_result(&self, chat_jid: &str, payload: OutboundPayload) {
        info!(chat_jid = %chat_jid, message = %describe(&payload), "result ready for delivery");
    }
}

#[async_trait]
impl agentflow_heartbeat::ResultSink for LoggingResultSink {
    async fn send_result(&self, chat_jid: &str, payload: OutboundPayload) {
        info!(chat_jid = %chat_jid, message = %describe(&payload), "heartbeat result ready for delivery");
    }
}
