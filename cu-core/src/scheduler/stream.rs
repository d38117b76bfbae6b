use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use crate::domain::{Ordinate, ScheduledMessage};

use super::{PageArgs, Result, SchedulerUnit};

/// Messages fetched per page.
pub const PAGE_SIZE: u32 = 1000;

/// Lazy, paginated view of a process's message log between two ordinates.
/// Finite (bounded by `to`), non-restartable; re-open to rewind.
pub struct MessageStream {
    su: Arc<dyn SchedulerUnit>,
    args: PageArgs,
    buffer: VecDeque<ScheduledMessage>,
    /// Ordinate of the last message yielded, the next page's `from`.
    cursor: Option<Ordinate>,
    exhausted: bool,
}

impl MessageStream {
    /// Open the log of `process_id` on `su_url`, from `from` (exclusive) up
    /// to `to` (inclusive). `None` for `to` streams to the current end.
    pub fn open(
        su: Arc<dyn SchedulerUnit>,
        su_url: impl Into<String>,
        process_id: impl Into<String>,
        from: Option<Ordinate>,
        to: Option<Ordinate>,
    ) -> Self {
        let from = from.filter(|o| !o.is_zero()).map(|o| o.without_cron());
        Self {
            su,
            args: PageArgs {
                su_url: su_url.into(),
                process_id: process_id.into(),
                from: from.clone(),
                to: to.map(|o| o.without_cron()),
                limit: PAGE_SIZE,
            },
            buffer: VecDeque::new(),
            cursor: from,
            exhausted: false,
        }
    }

    /// Next message in log order, or `None` at the end of the bounded
    /// range. An `Err` is terminal: the page fetch already exhausted its
    /// retries inside the scheduler client.
    pub async fn next(&mut self) -> Option<Result<ScheduledMessage>> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                self.cursor = Some(message.ordinate.clone());
                return Some(Ok(message));
            }
            if self.exhausted {
                return None;
            }
            let mut args = self.args.clone();
            args.from = self.cursor.clone();
            let page = match self.su.load_message_page(&args).await {
                Ok(page) => page,
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            };
            trace!(
                process_id = %self.args.process_id,
                fetched = page.edges.len(),
                has_next_page = page.has_next_page,
                "message page"
            );
            if !page.has_next_page {
                self.exhausted = true;
            }
            if page.edges.is_empty() {
                self.exhausted = true;
                continue;
            }
            self.buffer
                .extend(page.edges.into_iter().map(|edge| edge.node));
        }
    }
}
