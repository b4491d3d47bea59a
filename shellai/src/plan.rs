//! Responder mode: one decision, re-encoded, never acted on.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::codec::{WireFormat, decode, encode};
use crate::core::validate::validate;
use crate::io::completion::Completion;
use crate::io::config::AgentConfig;
use crate::io::prompt::{Mode, PromptRenderer, PromptRequest, RequestKind};

/// Ask for a decision on `question` and return it encoded as `format`.
///
/// The reply may arrive in either wire format; invalid documents are errors.
#[instrument(skip_all, fields(format = %format))]
pub fn plan<C: Completion + ?Sized>(
    config: &AgentConfig,
    completion: &C,
    question: &str,
    format: WireFormat,
    system_info: Option<&str>,
) -> Result<String> {
    let prompt = PromptRenderer::new()?.render(&PromptRequest {
        kind: RequestKind::Process,
        issue: question,
        mode: Mode::Dev,
        script_output: None,
        system_info,
        wire_format: config.wire_format,
    })?;
    let raw = completion
        .complete(&prompt, &[])
        .context("request decision")?;
    let decoded = decode(&raw).context("decode decision")?;
    validate(&decoded.document).context("validate decision")?;
    info!(
        kind = %decoded.document.kind,
        from = %decoded.format,
        stage = decoded.stage.as_str(),
        "decision planned"
    );
    Ok(encode(&decoded.document, format))
}
