use crate::lenient_json::parse_lenient;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use shopscout_core::{ChatMessage, ChatRole, CompletionBackend, GenerationParams};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const JUDGE_SYSTEM_PROMPT: &str = "You are an AI assistant tasked with evaluating the \
compliance of model outputs to given prompts and conversation context.";

const METRIC_EXTRACTION: &str = "information_extraction";
const METRIC_SOURCE: &str = "source_quality";

/// One recorded turn to judge: the conversation as the model saw it, plus the
/// reply it produced.
#[derive(Debug, Deserialize)]
struct TranscriptRecord {
    history: Vec<ChatMessage>,
    reply: String,
}

pub struct EvalSpec {
    /// JSONL file, one `{history, reply}` record per line.
    pub transcripts: PathBuf,
    pub out: PathBuf,
}

fn judge_prompt(record: &TranscriptRecord) -> String {
    let system_prompt = record
        .history
        .iter()
        .find(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let turns: Vec<&ChatMessage> = record
        .history
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .collect();
    let latest = turns
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let history_json = serde_json::to_string_pretty(&turns).unwrap_or_default();

    format!(
        "System Prompt: {system_prompt}\n\n\
         Message History:\n{history_json}\n\n\
         Latest User Message: {latest}\n\n\
         Model Output: {reply}\n\n\
         Based on the above, evaluate the model output for compliance with the system \
         prompt and the context of the conversation, on two metrics:\n\
         - {METRIC_EXTRACTION}: the output pulls out products with product info \
         (cost, reviews, pros and cons). 1 = irrelevant or very partial, 2 = misses \
         key aspects, 3 = good but improvable, 4 = relevant, direct, detailed.\n\
         - {METRIC_SOURCE}: how legitimate and reliable the information source is. \
         1 = cannot support an answer, 2 = not enough data, 3 = helpful but \
         improvable, 4 = contains all the necessary information.\n\n\
         Score each from 1 to 4. Respond in the following correct and exact JSON \
         format with double quotes:\n\
         [\n  {{\"key\": \"{METRIC_EXTRACTION}\", \"score\": \"<int>\", \"explanation\": \"<string>\"}},\n  \
         {{\"key\": \"{METRIC_SOURCE}\", \"score\": \"<int>\", \"explanation\": \"<string>\"}}\n]",
        reply = record.reply,
    )
}

fn score_as_u64(v: &serde_json::Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Scores normalized to 0..1 (judge scale is 1..4), keyed by metric.
fn scores_from_judge(raw: &str) -> Option<Vec<serde_json::Value>> {
    let v = parse_lenient(raw).ok()?;
    let arr = v.as_array()?;
    let mut out = Vec::new();
    for item in arr {
        let key = item.get("key")?.as_str()?;
        let score = item.get("score").and_then(score_as_u64)?;
        let explanation = item
            .get("explanation")
            .and_then(|e| e.as_str())
            .unwrap_or("");
        out.push(json!({
            "key": key,
            "score": (score as f64) / 4.0,
            "reason": explanation,
        }));
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn zero_scores(reason: &str) -> Vec<serde_json::Value> {
    [METRIC_EXTRACTION, METRIC_SOURCE]
        .iter()
        .map(|key| json!({"key": key, "score": 0.0, "reason": reason}))
        .collect()
}

async fn collect_reply(
    backend: &dyn CompletionBackend,
    messages: &[ChatMessage],
    params: &GenerationParams,
) -> shopscout_core::Result<String> {
    let mut stream = backend.stream_chat(messages, params).await?;
    let mut out = String::new();
    while let Some(delta) = stream.next().await {
        out.push_str(&delta?);
    }
    Ok(out)
}

/// Judge every transcript record and write a JSON report.
///
/// A judge call or parse failure scores that record zero with the raw judge
/// output preserved in the reason; it never aborts the run.
pub async fn run(
    spec: EvalSpec,
    backend: &dyn CompletionBackend,
    params: &GenerationParams,
) -> Result<PathBuf> {
    let raw = fs::read_to_string(&spec.transcripts)
        .with_context(|| format!("reading {}", spec.transcripts.display()))?;

    let mut records_out = Vec::new();
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: TranscriptRecord = serde_json::from_str(line)
            .with_context(|| format!("transcript line {}", index + 1))?;

        let messages = vec![
            ChatMessage::system(JUDGE_SYSTEM_PROMPT),
            ChatMessage::user(judge_prompt(&record)),
        ];

        let (ok, results) = match collect_reply(backend, &messages, params).await {
            Err(e) => (false, zero_scores(&format!("judge call failed: {e}"))),
            Ok(reply) => match scores_from_judge(&reply) {
                Some(results) => (true, results),
                None => (
                    false,
                    zero_scores(&format!("failed to parse judge response: {reply}")),
                ),
            },
        };

        for r in &results {
            let key = r["key"].as_str().unwrap_or_default().to_string();
            let score = r["score"].as_f64().unwrap_or(0.0);
            let entry = sums.entry(key).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
        records_out.push(json!({"index": index, "ok": ok, "results": results}));
    }

    let mean_scores: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(k, (sum, n))| (k, sum / n.max(1) as f64))
        .collect();

    let report = json!({
        "schema_version": 1,
        "judge_model": params.model,
        "transcripts": spec.transcripts.display().to_string(),
        "records": records_out,
        "mean_scores": mean_scores,
    });

    if let Some(parent) = spec.out.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&spec.out, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("writing {}", spec.out.display()))?;
    Ok(spec.out)
}
