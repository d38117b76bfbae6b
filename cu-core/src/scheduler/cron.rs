use std::collections::VecDeque;

use tracing::debug;

use crate::domain::{BlockRef, EvalCursor, Ordinate, Process, ScheduledMessage, Tag};

use super::stream::MessageStream;
use super::Result;

/// One time-driven message source declared by a process. Parsed from the
/// process tag list: a `Cron-Interval` tag opens a spec, subsequent
/// `Cron-Tag-*` tags attach to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronSpec {
    pub interval_ms: i64,
    /// The raw interval value, e.g. `"10-minutes"`; part of the cron
    /// identifier stored on evaluations.
    pub name: String,
    pub tags: Vec<Tag>,
}

pub fn parse_cron_specs(process: &Process) -> Vec<CronSpec> {
    let mut specs: Vec<CronSpec> = Vec::new();
    for tag in &process.tags {
        if tag.name == "Cron-Interval" {
            match parse_interval(&tag.value) {
                Some(interval_ms) => specs.push(CronSpec {
                    interval_ms,
                    name: tag.value.clone(),
                    tags: Vec::new(),
                }),
                None => {
                    debug!(value = %tag.value, "unsupported cron interval, skipping");
                }
            }
        } else if let Some(name) = tag.name.strip_prefix("Cron-Tag-") {
            if let Some(spec) = specs.last_mut() {
                spec.tags.push(Tag::new(name, tag.value.clone()));
            }
        }
    }
    specs
}

/// `"30-seconds"`, `"10-minutes"`, `"2-hours"`, `"1-day"` → milliseconds.
/// Block-driven intervals have no wall-clock meaning here and are skipped.
fn parse_interval(raw: &str) -> Option<i64> {
    let (count, unit) = raw.trim().split_once('-')?;
    let count: i64 = count.parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit_ms = match unit.trim_end_matches('s') {
        "millisecond" => 1,
        "second" => 1000,
        "minute" => 60 * 1000,
        "hour" => 60 * 60 * 1000,
        "day" => 24 * 60 * 60 * 1000,
        _ => return None,
    };
    Some(count * unit_ms)
}

/// Wraps a [`MessageStream`] and interleaves synthetic cron messages by
/// timestamp. Tick times lie on a fixed grid anchored at the process's
/// creation block, so any replay, whether from cold start or from a
/// checkpoint in the middle of a gap, regenerates identical ticks and
/// ordinates.
pub struct CronStream {
    inner: MessageStream,
    specs: Vec<CronSpec>,
    origin_ts: i64,
    to_ts: Option<i64>,
    /// When the read targets a cron ordinate, trailing ticks are generated
    /// up to exactly that tick after the log runs out.
    to_ordinate: Option<Ordinate>,

    /// Ordinate of the last real message (cron ordinates suffix it).
    base: Ordinate,
    /// Timestamp of the last yielded entry, the open edge of the gap.
    last_ts: i64,
    /// Ticks already emitted since `base`.
    ticks_emitted: u64,
    last_block: BlockRef,
    epoch: u64,
    nonce: u64,

    pending_cron: VecDeque<ScheduledMessage>,
    pending_real: Option<ScheduledMessage>,
    done: bool,
}

impl CronStream {
    /// `start` is the cursor of the starting memory; a cursor sitting on a
    /// cron tick resumes its gap with the tick counter intact. `to_ts`
    /// bounds trailing ticks generated after the last real message.
    pub fn new(
        inner: MessageStream,
        specs: Vec<CronSpec>,
        process: &Process,
        start: &EvalCursor,
        to_ts: Option<i64>,
        to_ordinate: Option<Ordinate>,
    ) -> Self {
        Self {
            inner,
            specs,
            origin_ts: process.block.timestamp,
            to_ts,
            to_ordinate,
            base: start.ordinate.without_cron(),
            last_ts: start.timestamp,
            ticks_emitted: start.ordinate.cron_tick().unwrap_or(0),
            last_block: BlockRef {
                height: start.block_height,
                timestamp: start.timestamp,
            },
            epoch: start.epoch,
            nonce: start.nonce,
            pending_cron: VecDeque::new(),
            pending_real: None,
            done: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<ScheduledMessage>> {
        loop {
            if let Some(message) = self.pending_cron.pop_front() {
                self.ticks_emitted = message.ordinate.cron_tick().unwrap_or(self.ticks_emitted);
                self.last_ts = message.timestamp;
                return Some(Ok(message));
            }
            if self.done {
                return None;
            }
            if self.pending_real.is_none() {
                match self.inner.next().await {
                    Some(Ok(message)) => self.pending_real = Some(message),
                    Some(Err(err)) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                    None => {
                        self.done = true;
                        if let Some(to_ts) = self.to_ts {
                            self.fill_gap(to_ts, true);
                        } else {
                            self.fill_trailing_ticks();
                        }
                        continue;
                    }
                }
            }
            let next_real_ts = self.pending_real.as_ref().map(|m| m.timestamp);
            if let Some(gap_end) = next_real_ts {
                self.fill_gap(gap_end, false);
                if !self.pending_cron.is_empty() {
                    continue;
                }
                let message = self.pending_real.take().expect("peeked message");
                self.base = message.ordinate.clone();
                self.last_ts = message.timestamp;
                self.ticks_emitted = 0;
                self.last_block = message.block;
                self.epoch = message.epoch;
                self.nonce = message.nonce;
                return Some(Ok(message));
            }
        }
    }

    /// Generate the ticks after the final real message when the read
    /// targets a cron ordinate in that trailing gap.
    fn fill_trailing_ticks(&mut self) {
        let Some(target) = &self.to_ordinate else {
            return;
        };
        let Some(upto) = target.cron_tick() else {
            return;
        };
        if target.without_cron() != self.base || self.specs.is_empty() {
            return;
        }
        // Walk the merged grid one instant at a time until the target
        // count; simultaneous ticks keep spec order, exactly as in
        // `fill_gap`, so tick numbering agrees with a full replay.
        let mut n = self.ticks_emitted;
        let mut from_ts = self.last_ts.max(self.origin_ts);
        while n < upto {
            let next_times: Vec<i64> = self
                .specs
                .iter()
                .map(|spec| {
                    let k = (from_ts - self.origin_ts) / spec.interval_ms + 1;
                    self.origin_ts + k * spec.interval_ms
                })
                .collect();
            let Some(&t) = next_times.iter().min() else { break };
            for (idx, tick_t) in next_times.iter().enumerate() {
                if *tick_t != t || n >= upto {
                    continue;
                }
                n += 1;
                let spec = &self.specs[idx];
                self.pending_cron.push_back(ScheduledMessage {
                    ordinate: self.base.with_cron_tick(n),
                    message_id: None,
                    is_assignment: false,
                    cron: Some(format!("{}-{}", idx + 1, spec.name)),
                    tags: spec.tags.clone(),
                    data: None,
                    block: self.last_block,
                    timestamp: t,
                    epoch: self.epoch,
                    nonce: self.nonce,
                    owner: String::new(),
                });
            }
            from_ts = t;
        }
    }

    /// Generate every tick in `(last_ts, gap_end)` (or `..=gap_end` when
    /// `inclusive`), in `(time, spec index)` order, numbering on from
    /// `ticks_emitted`.
    fn fill_gap(&mut self, gap_end: i64, inclusive: bool) {
        if self.specs.is_empty() {
            return;
        }
        let gap_start = self.last_ts.max(self.origin_ts);
        let mut ticks: Vec<(i64, usize)> = Vec::new();
        for (idx, spec) in self.specs.iter().enumerate() {
            let mut k = (gap_start - self.origin_ts) / spec.interval_ms + 1;
            loop {
                let t = self.origin_ts + k * spec.interval_ms;
                let in_range = if inclusive { t <= gap_end } else { t < gap_end };
                if !in_range {
                    break;
                }
                if t > self.last_ts {
                    ticks.push((t, idx));
                }
                k += 1;
            }
        }
        ticks.sort_unstable();
        let mut n = self.ticks_emitted;
        for (t, idx) in ticks {
            n += 1;
            let spec = &self.specs[idx];
            self.pending_cron.push_back(ScheduledMessage {
                ordinate: self.base.with_cron_tick(n),
                message_id: None,
                is_assignment: false,
                cron: Some(format!("{}-{}", idx + 1, spec.name)),
                tags: spec.tags.clone(),
                data: None,
                block: self.last_block,
                timestamp: t,
                epoch: self.epoch,
                nonce: self.nonce,
                owner: String::new(),
            });
        }
    }
}
