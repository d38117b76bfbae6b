use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::checkpoint::MemoryBound;
use crate::domain::{
    EvalCursor, EvalOutput, Evaluation, MemorySlot, MessageIdentity, ModuleMeta, Ordinate,
    Process, ProcessMemory, ScheduledMessage,
};
use crate::scheduler::{parse_cron_specs, CronStream, MessageStream};
use crate::telemetry;
use crate::unit::UnitCore;
use crate::wasm::EvalOutcome;
use crate::workers::PreparedJob;

use super::target::EvalTarget;
use super::{PipelineError, Result};

/// What a read returns: the terminal evaluation, or the bare cursor when
/// the run evaluated nothing new.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateReply {
    pub process_id: String,
    pub ordinate: Ordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    pub timestamp: i64,
    pub block_height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<EvalOutput>,
    pub gas_used: u64,
}

impl StateReply {
    pub fn from_evaluation(evaluation: &Evaluation) -> Self {
        Self {
            process_id: evaluation.process_id.clone(),
            ordinate: evaluation.ordinate.clone(),
            cron: evaluation.cron.clone(),
            timestamp: evaluation.timestamp,
            block_height: evaluation.block_height,
            message_id: evaluation.message_id.clone(),
            output: Some(evaluation.output.clone()),
            gas_used: evaluation.gas_used,
        }
    }

    pub fn from_cursor(cursor: &EvalCursor) -> Self {
        Self {
            process_id: cursor.process_id.clone(),
            ordinate: cursor.ordinate.clone(),
            cron: cursor.cron.clone(),
            timestamp: cursor.timestamp,
            block_height: cursor.block_height,
            message_id: None,
            output: None,
            gas_used: 0,
        }
    }
}

/// A finished pipeline run: the reply for the caller plus the terminal
/// memory (dry-run overlays evaluate against it).
pub struct PipelineRun {
    pub reply: StateReply,
    pub memory: ProcessMemory,
}

/// Drive the process to `target`. The caller must hold the single-flight
/// slot for this process.
#[instrument(skip(core), fields(%target))]
pub async fn evaluate_process(
    core: &UnitCore,
    process_id: &str,
    target: &EvalTarget,
) -> Result<PipelineRun> {
    let process = resolve_process(core, process_id).await?;
    let module = Arc::new(resolve_module(core, &process).await?);
    let binary = core.loader.load(&module.id).await?;
    let location = core
        .locator
        .locate(process_id)
        .await
        .map_err(PipelineError::Locate)?;

    let (to_ordinate, to_ts) = match target {
        EvalTarget::Latest => {
            let (_, now) = core.su.load_timestamp(&location.url, process_id).await?;
            (None, Some(now))
        }
        EvalTarget::Ordinate(o) => (Some(o.clone()), None),
        EvalTarget::Timestamp(t) => (None, Some(*t)),
    };
    let bound = MemoryBound {
        ordinate: to_ordinate.clone(),
        timestamp: to_ts,
    };

    let start = core.memory_locator.find_latest_before(&process, &bound).await?;
    let stream_type: &'static str = if start.cursor.ordinate.is_zero() {
        "cold"
    } else {
        "hot"
    };
    debug!(
        start_ordinate = %start.cursor.ordinate,
        stream_type,
        "starting evaluation stream"
    );

    // Already exactly at an ordinate target: nothing to stream, nothing to
    // evaluate. The checkpoint-recovery path lands here.
    let at_target = to_ordinate.as_ref() == Some(&start.cursor.ordinate);

    let inner = MessageStream::open(
        core.su.clone(),
        location.url.as_str(),
        process_id,
        Some(start.cursor.ordinate.clone()),
        to_ordinate.clone(),
    );
    let mut stream = CronStream::new(
        inner,
        parse_cron_specs(&process),
        &process,
        &start.cursor,
        to_ts,
        to_ordinate.clone(),
    );

    let mut buffer = match start.slot {
        MemorySlot::Buffer(bytes) => bytes,
        // find_latest_before hydrates; a file slot here means the read
        // failed after selection, so replay from its position with the
        // cold-start image is not an option. Treat as io error.
        MemorySlot::File(path) => {
            return Err(crate::checkpoint::CheckpointError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unhydrated memory file {}", path.display()),
            ))
            .into())
        }
    };
    let mut cursor = start.cursor.clone();
    let mut gas_acc = start.gas_used;
    let mut last_evaluation: Option<Evaluation> = None;
    let mut evaluated = 0u64;

    while let Some(next) = if at_target { None } else { stream.next().await } {
        let message = next?;
        if let Some(limit) = to_ts {
            if message.timestamp > limit {
                break;
            }
        }
        if message.ordinate <= cursor.ordinate {
            continue;
        }

        let identity = MessageIdentity::of(process_id, &message);
        if !matches!(identity, MessageIdentity::None) {
            match core
                .store
                .find_message_before(
                    process_id,
                    identity.message_id(),
                    identity.deep_hash(),
                    &message.ordinate,
                )
                .await
            {
                Ok(prior) => {
                    debug!(
                        ordinate = %message.ordinate,
                        prior = %prior.ordinate,
                        "duplicate identity, skipping replay"
                    );
                    telemetry::count_dedup();
                    continue;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        let message = hydrate_block(core, message).await?;

        let outcome = {
            let module = module.clone();
            let binary = binary.clone();
            let message = message.clone();
            let process_id = process_id.to_string();
            core.primary
                .admit(|| PreparedJob {
                    process_id,
                    memory: buffer.clone(),
                    message,
                    module,
                    binary,
                })
                .await?
        };

        let evaluation = build_evaluation(process_id, &message, &identity, &outcome);
        core.store.save_evaluation(&evaluation).await?;

        telemetry::count_evaluation(
            stream_type,
            if message.is_cron() {
                "cron"
            } else if message.is_pushed() {
                "pushed"
            } else {
                "scheduled"
            },
            evaluation.output.is_error(),
        );

        buffer = outcome.memory;
        cursor = EvalCursor {
            process_id: process_id.to_string(),
            ordinate: message.ordinate.clone(),
            timestamp: message.timestamp,
            block_height: message.block.height,
            epoch: message.epoch,
            nonce: message.nonce,
            cron: message.cron.clone(),
        };
        gas_acc += outcome.gas_used;
        evaluated += 1;

        let threshold = core.config.eager_checkpoint_gas_threshold;
        if threshold > 0 && gas_acc >= threshold {
            let snapshot = ProcessMemory {
                slot: MemorySlot::Buffer(buffer.clone()),
                module_id: module.id.clone(),
                cursor: cursor.clone(),
                gas_used: gas_acc,
            };
            let writer = core.checkpoints.clone();
            // Fire and forget; the writer logs and swallows failures.
            tokio::spawn(async move {
                writer.save_checkpoint(&snapshot).await;
            });
            gas_acc = 0;
        }

        last_evaluation = Some(evaluation);
    }

    let terminal = ProcessMemory {
        slot: MemorySlot::Buffer(buffer),
        module_id: module.id.clone(),
        cursor: cursor.clone(),
        gas_used: gas_acc,
    };
    core.cache.set(process_id, terminal.clone()).await;
    telemetry::record_cache_usage(&core.cache.usage());
    info!(evaluated, terminal_ordinate = %cursor.ordinate, "evaluation stream finished");

    let reply = match &last_evaluation {
        Some(evaluation) => StateReply::from_evaluation(evaluation),
        None => StateReply::from_cursor(&cursor),
    };
    Ok(PipelineRun {
        reply,
        memory: terminal,
    })
}

/// Evaluate `overlay` against an existing memory without persisting
/// anything or touching the cache. Admission goes through the dry-run
/// queue; its ceiling surfaces as [`crate::workers::WorkerError::Overloaded`].
pub async fn dry_run_overlay(
    core: &UnitCore,
    base: &ProcessMemory,
    overlay: ScheduledMessage,
) -> Result<EvalOutcome> {
    let module = Arc::new(core.store.find_module(&base.module_id).await?);
    let binary = core.loader.load(&module.id).await?;
    let memory = match &base.slot {
        MemorySlot::Buffer(bytes) => bytes.clone(),
        MemorySlot::File(path) => {
            core.files
                .read_file(&path.display().to_string())
                .await
                .map_err(crate::checkpoint::CheckpointError::Io)?
        }
    };
    let process_id = base.cursor.process_id.clone();
    let outcome = core
        .dry_run
        .admit(move || PreparedJob {
            process_id,
            memory,
            message: overlay,
            module,
            binary,
        })
        .await?;
    Ok(outcome)
}

async fn resolve_process(core: &UnitCore, process_id: &str) -> Result<Process> {
    let process = match core.store.find_process(process_id).await {
        Ok(process) => process,
        Err(err) if err.is_not_found() => {
            let location = core
                .locator
                .locate(process_id)
                .await
                .map_err(PipelineError::Locate)?;
            let process = core.su.load_process(&location.url, process_id).await?;
            core.store.save_process(&process).await?;
            process
        }
        Err(err) => return Err(err.into()),
    };
    if !core.config.process_allowed(&process.id, &process.owner) {
        return Err(PipelineError::AccessDenied {
            process_id: process.id,
        });
    }
    Ok(process)
}

async fn resolve_module(core: &UnitCore, process: &Process) -> Result<ModuleMeta> {
    let module = match core.store.find_module(&process.module_id).await {
        Ok(module) => module,
        Err(err) if err.is_not_found() => {
            let module = core.gateway.fetch_module_meta(&process.module_id).await?;
            crate::wasm::validate_module(&core.config, &module)?;
            core.store.save_module(&module).await?;
            module
        }
        Err(err) => return Err(err.into()),
    };
    // Stored modules were validated on first resolution; re-check anyway so
    // a tightened configuration takes effect without wiping the store.
    crate::wasm::validate_module(&core.config, &module)?;
    Ok(module)
}

/// Fill in a missing block timestamp from the block cache, falling back to
/// the gateway and remembering what it returns.
async fn hydrate_block(core: &UnitCore, mut message: ScheduledMessage) -> Result<ScheduledMessage> {
    if message.block.timestamp != 0 || message.block.height == 0 {
        return Ok(message);
    }
    let height = message.block.height;
    let cached = core.store.find_blocks(height, height + 1).await?;
    if let Some(block) = cached.first() {
        message.block.timestamp = block.timestamp;
        return Ok(message);
    }
    let fetched = core.gateway.load_blocks(height, height + 1).await?;
    if !fetched.is_empty() {
        core.store.save_blocks(&fetched).await?;
        message.block.timestamp = fetched[0].timestamp;
    }
    Ok(message)
}

fn build_evaluation(
    process_id: &str,
    message: &ScheduledMessage,
    identity: &MessageIdentity,
    outcome: &EvalOutcome,
) -> Evaluation {
    Evaluation {
        process_id: process_id.to_string(),
        ordinate: message.ordinate.clone(),
        cron: message.cron.clone(),
        timestamp: message.timestamp,
        block_height: message.block.height,
        epoch: message.epoch,
        nonce: message.nonce,
        message_id: message.message_id.clone(),
        deep_hash: identity.deep_hash().map(str::to_string),
        output: outcome.output.clone(),
        gas_used: outcome.gas_used,
        evaluated_at: Utc::now().timestamp_millis(),
    }
}
