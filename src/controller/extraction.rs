//! Result and memory capture from the agent container's log tail.
//!
//! The workload's filesystem is gone once it finishes, so anything the run
//! wants to hand back is printed between marker lines and read here before
//! teardown.

use crate::error::ExtractionError;
use serde::Deserialize;

pub const RESULT_BEGIN: &str = "__AGENT_RESULT_BEGIN__";
pub const RESULT_END: &str = "__AGENT_RESULT_END__";
pub const MEMORY_BEGIN: &str = "__AGENT_MEMORY_BEGIN__";
pub const MEMORY_END: &str = "__AGENT_MEMORY_END__";

#[derive(Debug, Deserialize)]
struct ResultPayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    response: String,
}

/// Everything captured from one log tail.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub result: Option<String>,
    pub memory: Option<String>,
}

/// Text between the last `begin` marker that is closed by an `end` marker
/// and that `end`. An opener left dangling after a complete block (output
/// cut off mid-write) does not hide the block.
fn last_block<'a>(
    logs: &'a str,
    begin: &str,
    end: &str,
) -> Result<Option<&'a str>, ExtractionError> {
    let mut opened = false;
    for (start, _) in logs.rmatch_indices(begin) {
        opened = true;
        let body = &logs[start + begin.len()..];
        if let Some(stop) = body.find(end) {
            return Ok(Some(body[..stop].trim()));
        }
    }
    if opened {
        return Err(ExtractionError::UnterminatedMarker(begin.to_string()));
    }
    Ok(None)
}

/// Response text of the last result block; `None` when absent or when the
/// agent reported an error.
pub fn extract_result(logs: &str) -> Result<Option<String>, ExtractionError> {
    let Some(block) = last_block(logs, RESULT_BEGIN, RESULT_END)? else {
        return Ok(None);
    };
    let payload: ResultPayload = serde_json::from_str(block)?;
    if payload.status == "error" {
        return Ok(None);
    }
    Ok(Some(payload.response))
}

/// Memory text of the last memory block, if non-empty.
pub fn extract_memory(logs: &str) -> Result<Option<String>, ExtractionError> {
    Ok(last_block(logs, MEMORY_BEGIN, MEMORY_END)?
        .filter(|text| !text.is_empty())
        .map(str::to_string))
}

/// Runs both extractions independently; a failure in one does not hide the other.
pub fn extract(logs: &str) -> Extracted {
    let result = extract_result(logs).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Result extraction failed");
        None
    });
    let memory = extract_memory(logs).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Memory extraction failed");
        None
    });
    Extracted { result, memory }
}
