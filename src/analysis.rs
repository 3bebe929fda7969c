//! Vision analysis of user-grouped detail images.
//!
//! `request_analysis` records what should be analysed; `run_analysis` is the
//! background half that calls the model and stores its answer.

use crate::llm::VisionModel;
use crate::models::{AnalysisRequest, AnalysisResult, AnalysisStatus};
use crate::pipeline::{PipelineError, storage_error};
use crate::spaces::fix_url;
use crate::storage::{NewAnalysis, Store};
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_ANALYSIS_MODEL: &str = "gpt-4";
pub const FALLBACK_PROMPT: &str = "describe the image";

/// Creates one pending analysis per requested image group.
///
/// A group that was analysed before is reset to pending with its current
/// images and prompt, so the next run analyses it again. Groups without
/// images are skipped; the item is still marked in progress.
pub fn request_analysis(
    store: &Store,
    item_id: i64,
    request: &AnalysisRequest,
) -> Result<Vec<AnalysisResult>, PipelineError> {
    if request.sections.is_empty() {
        return Err(PipelineError::invalid_input("analysis", "sections_required"));
    }
    store
        .get_result_item(item_id)
        .map_err(storage_error("analysis"))?;

    let mut groups = Vec::new();
    for pair in &request.sections {
        let images = store
            .images_in_group(item_id, pair.section, pair.category)
            .map_err(storage_error("analysis"))?;
        if images.is_empty() {
            continue;
        }
        groups.push((pair, images));
    }
    store
        .set_item_analysis_status(item_id, AnalysisStatus::InProgress)
        .map_err(storage_error("analysis"))?;

    let requested_model = request.model.clone().filter(|m| !m.trim().is_empty());
    let model_requested = requested_model.is_some();
    let model = requested_model.unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL.to_string());

    let mut results = Vec::with_capacity(groups.len());
    for (pair, images) in groups {
        let prompt = match request.prompt_template.clone().filter(|p| !p.trim().is_empty()) {
            Some(prompt) => prompt,
            None => store
                .prompt_for_category(pair.category)
                .map_err(storage_error("analysis"))?
                .unwrap_or_else(|| FALLBACK_PROMPT.to_string()),
        };
        let image_urls: Vec<String> = images.iter().map(|image| fix_url(&image.url)).collect();
        let fresh = NewAnalysis {
            model_used: model.clone(),
            prompt_used: prompt,
            result_json: json!({
                "status": "pending",
                "image_count": image_urls.len(),
                "image_urls": image_urls,
                "model_requested": model_requested,
            }),
        };
        let (analysis, created) = store
            .get_or_create_analysis(item_id, pair.section, pair.category, fresh.clone())
            .map_err(storage_error("analysis"))?;
        let analysis = if created || analysis.status == AnalysisStatus::InProgress {
            analysis
        } else {
            store
                .reset_analysis(analysis.id, &fresh)
                .map_err(storage_error("analysis"))?
        };
        results.push(analysis);
    }
    Ok(results)
}

/// Runs every analysis of the item that has not completed yet.
pub async fn run_analysis(
    store: &Store,
    model: &dyn VisionModel,
    item_id: i64,
) -> Result<Value, PipelineError> {
    store
        .get_result_item(item_id)
        .map_err(storage_error("run_analysis"))?;
    let analyses = store
        .list_analyses(item_id)
        .map_err(storage_error("run_analysis"))?;

    let mut completed = 0usize;
    let mut skipped = 0usize;
    let mut summaries = Vec::new();
    for analysis in analyses {
        if analysis.status == AnalysisStatus::Completed {
            skipped += 1;
            continue;
        }
        let done = analyse_one(store, model, item_id, &analysis).await?;
        summaries.push(json!({
            "analysis_id": done.id,
            "section": done.section,
            "category": done.category,
            "summary": done.summary(),
            "key_points": done.key_points(),
        }));
        completed += 1;
    }

    store
        .set_item_analysis_status(item_id, AnalysisStatus::Completed)
        .map_err(storage_error("run_analysis"))?;
    info!(target = "scout.pipeline", item_id, completed, skipped, "analysis_completed");
    Ok(json!({
        "result_item_id": item_id,
        "completed": completed,
        "skipped": skipped,
        "summaries": summaries,
    }))
}

async fn analyse_one(
    store: &Store,
    model: &dyn VisionModel,
    item_id: i64,
    analysis: &AnalysisResult,
) -> Result<AnalysisResult, PipelineError> {
    store
        .set_analysis_status(analysis.id, AnalysisStatus::InProgress)
        .map_err(storage_error("run_analysis"))?;
    store
        .set_item_analysis_status(item_id, AnalysisStatus::InProgress)
        .map_err(storage_error("run_analysis"))?;

    let image_urls = image_urls(&analysis.result_json);
    let prompt = if analysis.prompt_used.trim().is_empty() {
        FALLBACK_PROMPT
    } else {
        analysis.prompt_used.as_str()
    };
    // The stored model is a label unless the caller asked for it.
    let model_requested = analysis.result_json["model_requested"].as_bool() == Some(true);
    let model_name = if model_requested && !analysis.model_used.trim().is_empty() {
        analysis.model_used.clone()
    } else {
        model.default_model().to_string()
    };

    let started = Instant::now();
    let response = match model.describe(&model_name, prompt, &image_urls).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                target = "scout.pipeline",
                analysis_id = analysis.id,
                error = %err,
                "analysis_model_failed"
            );
            store
                .set_analysis_status(analysis.id, AnalysisStatus::Failed)
                .map_err(storage_error("run_analysis"))?;
            store
                .set_item_analysis_status(item_id, AnalysisStatus::Failed)
                .map_err(storage_error("run_analysis"))?;
            return Err(PipelineError::upstream("run_analysis", err.to_string()));
        }
    };
    let processing_time = started.elapsed().as_secs_f64();

    let mut result = json!({
        "status": "completed",
        "analysis": response.text,
        "image_count": image_urls.len(),
        "image_urls": image_urls,
        "model_requested": model_requested,
        "model_sent": model_name,
        "usage": response.usage,
    });
    // Structured answers expose summary/key_points directly.
    if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(response.text.trim()) {
        for key in ["summary", "key_points"] {
            if let Some(value) = parsed.get(key) {
                result[key] = value.clone();
            }
        }
    }

    store
        .complete_analysis(analysis.id, &result, processing_time)
        .map_err(storage_error("run_analysis"))?;
    store
        .mark_images_analyzed(item_id, analysis.section, analysis.category)
        .map_err(storage_error("run_analysis"))?;
    Ok(AnalysisResult {
        result_json: result,
        processing_time: Some(processing_time),
        status: AnalysisStatus::Completed,
        ..analysis.clone()
    })
}

/// Image URLs stored on an analysis; the payload may itself be a JSON string.
pub fn image_urls(result_json: &Value) -> Vec<String> {
    let parsed;
    let object = match result_json {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).unwrap_or(Value::Null);
            &parsed
        }
        other => other,
    };
    let urls = match object.get("image_urls") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(raw)) => serde_json::from_str::<Vec<Value>>(raw).unwrap_or_default(),
        _ => Vec::new(),
    };
    urls.iter()
        .filter_map(Value::as_str)
        .map(fix_url)
        .collect()
}
