//! Windowing state machine over a sequence of store pages.
//!
//! The cursor never talks to the store. Each adapter fetches a page in its
//! own way, feeds it to [`Cursor::step`], and acts on the returned
//! [`NextAction`].

use tracing::debug;

use super::Result;
use crate::mapper::map_row;
use crate::model::Stock;
use crate::storage::{Page, PagingState, StorageError};

/// Which records of the scanned range reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Skip `offset` records across the concatenated pages, emit up to
    /// `limit`, then stop fetching.
    OffsetLimit { offset: u64, limit: u64 },
    /// Emit the one page the store returned and surface its paging state.
    SinglePage,
}

/// What the driving adapter must do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Fetch the next page by replaying this paging state.
    Fetch(PagingState),
    /// The scan is complete.
    Done { next_page: Option<PagingState> },
}

/// Records emitted by one page, and what happens next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub records: Vec<Stock>,
    pub next: NextAction,
}

impl Step {
    fn done(records: Vec<Stock>, next_page: Option<PagingState>) -> Self {
        Self {
            records,
            next: NextAction::Done { next_page },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cursor {
    window: Window,
    skip_remaining: u64,
    emit_remaining: u64,
    pages: usize,
    skipped: u64,
    emitted: u64,
    terminal: bool,
}

impl Cursor {
    pub fn new(window: Window) -> Self {
        let (skip_remaining, emit_remaining) = match window {
            Window::OffsetLimit { offset, limit } => (offset, limit),
            Window::SinglePage => (0, u64::MAX),
        };
        Self {
            window,
            skip_remaining,
            emit_remaining,
            pages: 0,
            skipped: 0,
            emitted: 0,
            terminal: false,
        }
    }

    pub fn offset_limit(offset: u64, limit: u64) -> Self {
        Self::new(Window::OffsetLimit { offset, limit })
    }

    pub fn single_page() -> Self {
        Self::new(Window::SinglePage)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Pages fed to this cursor so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Consume one page.
    ///
    /// A mapping failure makes the cursor terminal; records mapped earlier
    /// in the same page are dropped with the error. Stepping a terminal
    /// cursor emits nothing and finishes.
    pub fn step(&mut self, page: Page) -> Result<Step> {
        if self.terminal {
            return Ok(Step::done(Vec::new(), None));
        }
        self.pages += 1;

        let result = match self.window {
            Window::OffsetLimit { .. } => self.step_window(page),
            Window::SinglePage => self.step_single(page),
        };
        if result.is_err() {
            self.terminal = true;
        }
        result
    }

    fn step_window(&mut self, page: Page) -> Result<Step> {
        let (rows, has_more, paging_state) = page.into_parts();
        let mut records = Vec::new();

        for row in rows {
            if self.emit_remaining == 0 {
                break;
            }
            if self.skip_remaining > 0 {
                self.skip_remaining -= 1;
                self.skipped += 1;
                continue;
            }
            records.push(map_row(row)?);
            self.emit_remaining -= 1;
        }
        self.emitted += records.len() as u64;

        debug!(
            page = self.pages,
            emitted = records.len(),
            skip_remaining = self.skip_remaining,
            emit_remaining = self.emit_remaining,
            has_more,
            "Range scan page consumed"
        );

        if self.emit_remaining > 0 && has_more {
            return match paging_state.filter(|state| !state.is_empty()) {
                Some(state) => Ok(Step {
                    records,
                    next: NextAction::Fetch(state),
                }),
                None => Err(StorageError::MissingPagingState.into()),
            };
        }

        self.terminal = true;
        Ok(Step::done(records, None))
    }

    fn step_single(&mut self, page: Page) -> Result<Step> {
        let (rows, has_more, paging_state) = page.into_parts();
        let records = rows
            .into_iter()
            .map(map_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.emitted += records.len() as u64;

        let next_page = if has_more {
            match paging_state.filter(|state| !state.is_empty()) {
                Some(state) => Some(state),
                None => return Err(StorageError::MissingPagingState.into()),
            }
        } else {
            None
        };

        debug!(
            emitted = records.len(),
            has_more = next_page.is_some(),
            "Range scan single page consumed"
        );

        self.terminal = true;
        Ok(Step::done(records, next_page))
    }
}
