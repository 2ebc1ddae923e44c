use std::sync::{Mutex, PoisonError};

/// A page claimed from the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageClaim {
    pub offset: i64,
    pub limit: i64,
}

/// Process-wide position in the catalog.
///
/// Every read-and-advance happens under one lock, so concurrent claims always
/// receive distinct pages.
#[derive(Debug)]
pub struct PaginationCursor {
    offset: Mutex<i64>,
    page_size: i64,
}

impl PaginationCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: Mutex::new(0),
            page_size: i64::from(page_size.max(1)),
        }
    }

    /// Return the page at the current offset and advance past it.
    pub fn claim(&self) -> PageClaim {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        let claim = PageClaim {
            offset: *offset,
            limit: self.page_size,
        };
        *offset += self.page_size;
        claim
    }

    pub fn reset(&self) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }

    pub fn offset(&self) -> i64 {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }
}
