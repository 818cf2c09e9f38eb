//! Page windows over ordered sequences.
//!
//! Thread pages repeat the last post of the previous page at their top so a
//! reader landing on page N still sees what the first reply answers.

use std::ops::Range;

/// Page number from a raw query parameter. Missing or non-numeric values
/// mean the first page; out-of-range numbers are kept so the caller can
/// reject them.
#[must_use]
pub fn parse_page(param: Option<&str>) -> i64 {
    param
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(1)
}

/// Number of pages needed for `total` items; an empty sequence has one page.
#[must_use]
pub fn num_pages(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

/// Clamp a requested page into `1..=num_pages`.
#[must_use]
pub fn clamp_page(total: usize, page_size: usize, page: i64) -> usize {
    let last = num_pages(total, page_size);
    page.clamp(1, last as i64) as usize
}

/// Indices (0-based) selected by one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub num_pages: usize,
    /// Items that belong to this page.
    pub start: usize,
    pub end: usize,
    /// Last item of the previous page, repeated on top of this one.
    pub carry: Option<usize>,
}

impl PageWindow {
    /// Own items of the page, without the carried one.
    #[must_use]
    pub fn own(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Everything to display: the carried item followed by the own items.
    #[must_use]
    pub fn display(&self) -> Range<usize> {
        self.carry.unwrap_or(self.start)..self.end
    }
}

/// Window of page `page` (1-based) over `total` items.
///
/// Returns `None` for a page below 1 or past the last page.
#[must_use]
pub fn page_window(total: usize, page_size: usize, page: i64) -> Option<PageWindow> {
    let page_size = page_size.max(1);
    let pages = num_pages(total, page_size);
    if page < 1 || page as usize > pages {
        return None;
    }
    let page = page as usize;

    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total);
    let carry = (page > 1).then(|| start - 1);

    Some(PageWindow {
        page,
        num_pages: pages,
        start,
        end,
        carry,
    })
}

/// Items shown on a thread page, with the previous page's last item first.
#[must_use]
pub fn page<T: Clone>(items: &[T], page_size: usize, page: i64) -> Option<Vec<T>> {
    let window = page_window(items.len(), page_size, page)?;
    Some(items[window.display()].to_vec())
}

/// Items of a plain listing page, no carried item.
#[must_use]
pub fn slice_page<T: Clone>(items: &[T], page_size: usize, page: usize) -> Vec<T> {
    page_window(items.len(), page_size, page as i64)
        .map(|window| items[window.own()].to_vec())
        .unwrap_or_default()
}
