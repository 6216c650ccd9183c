//! Text rendering for CLI output.

use crate::cas::tree::{entries, DirectoryMap};
use crate::digest::Digest;
use crate::error::FetchError;
use crate::operation::{ExecutionTimeline, OperationSummary};
use crate::proto::buildfarm::{BackplaneStatus, WorkerProfileMessage};
use crate::status::QueueSample;
use crate::workers::{WorkerState, EXECUTE_ACTION_STAGE, INPUT_FETCH_STAGE, REPORT_RESULT_STAGE};
use comfy_table::{presets, Table};
use owo_colors::OwoColorize;
use std::collections::HashSet;
use std::time::Duration;

pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.set_header(header);
    table
}

/// Queue sizes and active workers from one status sample.
pub fn format_status_text(status: &BackplaneStatus, latency: Option<Duration>) -> String {
    let mut output = format_section_heading("Backplane");
    if let Some(latency) = latency {
        output.push_str(&format!(" ({}ms)", latency.as_millis()));
    }
    output.push('\n');

    let mut queues = table(vec!["Queue", "Size", "Shards"]);
    if let Some(prequeue) = &status.prequeue {
        queues.add_row(vec![
            prequeue.name.clone(),
            prequeue.size.to_string(),
            shard_sizes(&prequeue.internal_sizes),
        ]);
    }
    if let Some(queue) = &status.operation_queue {
        for provision in &queue.provisions {
            queues.add_row(vec![
                provision.name.clone(),
                provision.size.to_string(),
                shard_sizes(&provision.internal_sizes),
            ]);
        }
        queues.add_row(vec![
            "(operation queue)".to_string(),
            queue.size.to_string(),
            String::new(),
        ]);
    }
    queues.add_row(vec![
        "(dispatched)".to_string(),
        status.dispatched_size.to_string(),
        String::new(),
    ]);
    output.push_str(&queues.to_string());
    output.push('\n');

    let mut sizes = table(vec!["Index", "Size"]);
    sizes.add_row(vec!["CAS lookup".to_string(), status.cas_lookup_size.to_string()]);
    sizes.add_row(vec!["Action cache".to_string(), status.action_cache_size.to_string()]);
    sizes.add_row(vec!["Blocked actions".to_string(), status.blocked_actions_size.to_string()]);
    sizes.add_row(vec![
        "Blocked invocations".to_string(),
        status.blocked_invocations_size.to_string(),
    ]);
    output.push_str(&sizes.to_string());
    output.push_str(&format!(
        "\n{} execute workers, {} storage workers\n",
        status.active_execute_workers.len(),
        status.active_storage_workers.len()
    ));
    output
}

fn shard_sizes(sizes: &[i64]) -> String {
    sizes
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Newest-first bucket averages.
pub fn format_history(history: &[QueueSample]) -> String {
    let mut output = table(vec!["Bucket", "Prequeue", "Queue", "Dispatched"]);
    for (age, sample) in history.iter().enumerate() {
        output.add_row(vec![
            format!("-{}", age),
            format!("{:.1}", sample.prequeue),
            format!("{:.1}", sample.queue),
            format!("{:.1}", sample.dispatched),
        ]);
    }
    output.to_string()
}

fn slots(state: &WorkerState, stage: &str) -> String {
    let (used, configured) = state.slots(stage);
    format!("{}/{}", used, configured)
}

/// One row per worker; stale workers are shown in red with their last error.
pub fn format_workers(workers: &[WorkerState]) -> String {
    if workers.is_empty() {
        return "No execute workers reported.".to_string();
    }
    let mut output = table(vec![
        "Worker",
        "Input fetch",
        "Execute",
        "Report",
        "CAS entries",
        "Stale",
    ]);
    for state in workers {
        let name = if state.is_stale() {
            state.display_name().red().to_string()
        } else {
            state.display_name().green().to_string()
        };
        let stale = match (state.stale, state.message.is_empty()) {
            (0, _) => String::new(),
            (n, true) => n.to_string(),
            (n, false) => format!("{} ({})", n, state.message),
        };
        output.add_row(vec![
            name,
            slots(state, INPUT_FETCH_STAGE),
            slots(state, EXECUTE_ACTION_STAGE),
            slots(state, REPORT_RESULT_STAGE),
            state.profile.cas_entry_count.to_string(),
            stale,
        ]);
    }
    output.to_string()
}

pub fn format_profile(worker: &str, profile: &WorkerProfileMessage) -> String {
    let mut output = format!("{}\n", format_section_heading(worker));
    let mut stages = table(vec!["Stage", "Used", "Configured", "Operations"]);
    for stage in &profile.stages {
        stages.add_row(vec![
            stage.name.clone(),
            stage.slots_used.to_string(),
            stage.slots_configured.to_string(),
            stage.operation_names.len().to_string(),
        ]);
    }
    output.push_str(&stages.to_string());
    output
}

/// One row per operation in listing order.
pub fn format_operations(operations: &[OperationSummary]) -> String {
    if operations.is_empty() {
        return "No operations.".to_string();
    }
    let mut output = table(vec![
        "Operation",
        "Kind",
        "Stage",
        "Target",
        "Mnemonic",
        "Worker",
        "Duration",
    ]);
    for summary in operations {
        let duration = summary
            .worker_duration()
            .map(format_duration)
            .unwrap_or_default();
        let stage = if summary.done {
            format!("{} (done)", summary.stage.as_str())
        } else {
            summary.stage.as_str().to_string()
        };
        output.add_row(vec![
            summary.name.clone(),
            summary.stage_kind.as_str().to_string(),
            stage,
            summary.request.target_id.clone(),
            summary.request.action_mnemonic.clone(),
            summary.worker.clone(),
            duration,
        ]);
    }
    let mut output = output.to_string();
    for summary in operations {
        if let Some(raw) = &summary.raw {
            output.push_str(&format!("\n{}\n{}\n", format_section_heading(&summary.name), raw));
        }
    }
    output
}

/// Detail view of a single operation.
pub fn format_operation_detail(
    summary: &OperationSummary,
    timeline: Option<&ExecutionTimeline>,
) -> String {
    let mut output = format!("{}\n", format_section_heading(&summary.name));
    let mut fields = table(vec!["Field", "Value"]);
    fields.add_row(vec!["Kind", summary.stage_kind.as_str()]);
    fields.add_row(vec!["Stage", summary.stage.as_str()]);
    fields.add_row(vec!["Done", if summary.done { "yes" } else { "no" }]);
    fields.add_row(vec!["Target", summary.request.target_id.as_str()]);
    fields.add_row(vec!["Mnemonic", summary.request.action_mnemonic.as_str()]);
    fields.add_row(vec!["Invocation", summary.request.tool_invocation_id.as_str()]);
    fields.add_row(vec![
        "Correlated invocations",
        summary.request.correlated_invocations_id.as_str(),
    ]);
    fields.add_row(vec!["Worker", summary.worker.as_str()]);
    output.push_str(&fields.to_string());
    output.push('\n');

    if let Some(timeline) = timeline {
        let mut steps = table(vec!["Step", "Elapsed", "Stalled"]);
        for step in &timeline.steps {
            steps.add_row(vec![
                step.label.to_string(),
                step.elapsed.map(format_duration).unwrap_or_default(),
                step.stalled.map(format_duration).unwrap_or_default(),
            ]);
        }
        output.push_str(&steps.to_string());
        output.push_str(&format!(
            "\ntotal stalled: {}\n",
            format_duration(timeline.total_stalled())
        ));
    }
    if let Some(raw) = &summary.raw {
        output.push_str(raw);
        output.push('\n');
    }
    output
}

pub fn format_duration(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds();
    if millis.abs() < 1_000 {
        format!("{}ms", millis)
    } else {
        format!("{:.3}s", millis as f64 / 1_000.0)
    }
}

/// Indented listing of a directory tree starting at `root`.
///
/// A directory reached twice is printed once; later references show only its
/// name.
pub fn format_tree(root: &Digest, directories: &DirectoryMap) -> Result<String, FetchError> {
    let mut output = format!("{} ({} directories)\n", root, directories.len());
    let mut seen = HashSet::new();
    write_directory(&mut output, root, directories, 1, &mut seen)?;
    Ok(output)
}

fn write_directory(
    output: &mut String,
    digest: &Digest,
    directories: &DirectoryMap,
    depth: usize,
    seen: &mut HashSet<String>,
) -> Result<(), FetchError> {
    let key = digest.to_string();
    let directory = directories
        .get(&key)
        .ok_or_else(|| FetchError::MissingDirectory { digest: key.clone() })?;
    if !seen.insert(key) {
        return Ok(());
    }
    let indent = "  ".repeat(depth);
    for entry in entries(directory, digest.function())? {
        if entry.is_directory {
            output.push_str(&format!("{}{}/ {}\n", indent, entry.name.bold(), entry.digest));
            write_directory(output, &entry.digest, directories, depth + 1, seen)?;
        } else {
            let marker = if entry.is_executable { "*" } else { "" };
            output.push_str(&format!("{}{}{} {}\n", indent, entry.name, marker, entry.digest));
        }
    }
    for link in &directory.symlinks {
        output.push_str(&format!("{}{} -> {}\n", indent, link.name, link.target));
    }
    Ok(())
}

/// Hex dump for binary blobs, text otherwise.
pub fn format_blob(digest: &Digest, blob: &[u8], force_hex: bool) -> String {
    match std::str::from_utf8(blob) {
        Ok(text) if !force_hex => text.to_string(),
        _ => {
            let mut output = format!("{} ({} bytes)\n", digest, blob.len());
            for (row, chunk) in blob.chunks(16).enumerate() {
                output.push_str(&format!("{:08x}  {}\n", row * 16, hex::encode(chunk)));
            }
            output
        }
    }
}
