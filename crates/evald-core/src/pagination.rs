//! Pagination buffer for evaluation output.
//!
//! One evaluation's full output is captured here and handed back to callers
//! in bounded pages. Exactly one cursor is live at a time: starting a new
//! page unconditionally replaces any prior cursor, drained or not, and a
//! rollback invalidates it.

use crate::error::{EvaldError, Result};

/// A page of output plus whether more lines remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub lines: Vec<String>,
    pub more_available: bool,
}

/// Server-side bookmark into one evaluation's buffered output.
#[derive(Debug)]
struct PageCursor {
    lines: Vec<String>,
    next_offset: usize,
}

/// Holds at most one live [`PageCursor`] and the configured page size.
#[derive(Debug)]
pub struct OutputPager {
    page_size: usize,
    cursor: Option<PageCursor>,
}

impl OutputPager {
    /// Creates a pager.
    ///
    /// A zero `page_size` is a configuration error; reject it at config
    /// load, before this constructor is reached.
    pub fn new(page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(EvaldError::config("page_size must be greater than zero"));
        }
        Ok(Self {
            page_size,
            cursor: None,
        })
    }

    /// Buffers a fresh evaluation's output and returns the first page.
    ///
    /// Any existing cursor is discarded, even if not fully drained.
    /// Empty output yields a single empty page with no more available.
    pub fn start_page(&mut self, lines: Vec<String>) -> Page {
        let mut cursor = PageCursor {
            lines,
            next_offset: 0,
        };
        let page = Self::advance(&mut cursor, self.page_size);
        self.cursor = if page.more_available {
            Some(cursor)
        } else {
            None
        };
        page
    }

    /// Returns the next page of the live cursor.
    ///
    /// Fails with [`EvaldError::NoActivePage`] when no cursor exists: before
    /// any evaluation, after the cursor is fully drained, or after a
    /// rollback invalidated it.
    pub fn next_page(&mut self) -> Result<Page> {
        let cursor = self.cursor.as_mut().ok_or(EvaldError::NoActivePage)?;
        let page = Self::advance(cursor, self.page_size);
        if !page.more_available {
            self.cursor = None;
        }
        Ok(page)
    }

    /// Drops any live cursor. Buffered output referring to pre-rollback
    /// state is stale and must not be servable.
    pub fn invalidate(&mut self) {
        self.cursor = None;
    }

    pub fn has_active_page(&self) -> bool {
        self.cursor.is_some()
    }

    fn advance(cursor: &mut PageCursor, page_size: usize) -> Page {
        let start = cursor.next_offset;
        let end = std::cmp::min(start + page_size, cursor.lines.len());
        let lines = cursor.lines[start..end].to_vec();
        cursor.next_offset = end;

        Page {
            lines,
            more_available: end < cursor.lines.len(),
        }
    }
}
