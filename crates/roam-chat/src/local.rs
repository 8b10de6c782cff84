//! Offline engine that answers from the stamp capabilities without a
//! language model. Answers are streamed as growing snapshots so clients
//! see the same partial/end flow as with a hosted model.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};

use roam_core::types::{RankedStamp, StampLocation};

use crate::capabilities::StampCapabilities;
use crate::engine::{GenerationEngine, SnapshotEvent, SnapshotStream, TurnRequest};
use crate::error::ChatError;

const NEARBY_KEYWORDS: [&str; 4] = ["附近", "周邊", "周遭", "near"];
const STAMP_KEYWORDS: [&str; 3] = ["集章", "印章", "stamp"];
const GREETING: &str = "您好！我可以幫您查詢附近尚未集到的集章地點，或列出所有還沒集到的集章。";

/// Characters per streamed snapshot step.
const CHUNK_CHARS: usize = 12;

pub struct LocalEngine {
    capabilities: Arc<dyn StampCapabilities>,
}

impl LocalEngine {
    pub fn new(capabilities: Arc<dyn StampCapabilities>) -> Self {
        Self { capabilities }
    }

    async fn answer(&self, request: &TurnRequest) -> String {
        let query = request.query.to_lowercase();
        if NEARBY_KEYWORDS.iter().any(|k| query.contains(k)) {
            render_nearby(&self.capabilities.rank_nearby(&request.caller).await)
        } else if STAMP_KEYWORDS.iter().any(|k| query.contains(k)) {
            render_all(&self.capabilities.list_all(&request.caller).await)
        } else {
            GREETING.to_string()
        }
    }
}

#[async_trait]
impl GenerationEngine for LocalEngine {
    async fn run_turn(&self, request: TurnRequest) -> Result<SnapshotStream, ChatError> {
        let answer = self.answer(&request).await;
        tracing::debug!(
            user = %request.caller.user,
            session = %request.session_id,
            chars = answer.chars().count(),
            "Answered locally"
        );
        Ok(stream::iter(snapshots(&answer).into_iter().map(Ok)).boxed())
    }
}

/// Cumulative snapshots of `answer`, ending with a turn-closing one.
fn snapshots(answer: &str) -> Vec<SnapshotEvent> {
    let boundaries: Vec<usize> = answer
        .char_indices()
        .map(|(i, _)| i)
        .step_by(CHUNK_CHARS)
        .skip(1)
        .collect();
    let mut events: Vec<SnapshotEvent> = boundaries
        .into_iter()
        .map(|end| SnapshotEvent::partial(&answer[..end]))
        .collect();
    events.push(SnapshotEvent::complete(answer));
    events
}

fn render_nearby(ranked: &[RankedStamp]) -> String {
    if ranked.is_empty() {
        return "目前在您所在的縣市找不到尚未集到的集章地點。".to_string();
    }
    let mut text = String::from("離您最近、尚未集到的集章地點：\n");
    for (i, entry) in ranked.iter().enumerate() {
        let _ = write!(text, "{}. ", i + 1);
        write_stamp(&mut text, &entry.stamp);
        let _ = writeln!(text, "   距離：{:.2} 公里", entry.distance_km);
    }
    text
}

fn render_all(stamps: &[StampLocation]) -> String {
    if stamps.is_empty() {
        return "您目前沒有尚未集到的集章。".to_string();
    }
    let mut text = format!("您還有 {} 個集章尚未集到：\n", stamps.len());
    for (i, stamp) in stamps.iter().enumerate() {
        let _ = write!(text, "{}. ", i + 1);
        write_stamp(&mut text, stamp);
    }
    text
}

fn write_stamp(text: &mut String, stamp: &StampLocation) {
    let _ = writeln!(text, "{}（{}）", stamp.stamp_name, stamp.activity_name);
    let _ = writeln!(text, "   活動期間：{}", stamp.activity_window);
    if !stamp.address.is_empty() {
        let _ = writeln!(text, "   地址：{}", stamp.address);
    }
}
