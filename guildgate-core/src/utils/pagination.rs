//! Page slicing for admin listings.

/// One page of a listing, with enough metadata to render a pager line.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Zero-based page index after clamping.
    pub page: usize,
    pub page_count: usize,
    pub total: usize,
    pub per_page: usize,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Slice `items` into the requested page.
///
/// Out-of-range requests clamp to the nearest valid page instead of erroring,
/// so a pager that raced a shrinking list still renders something sensible.
/// An empty input yields a single empty page.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let total = items.len();
    let page_count = total.div_ceil(per_page).max(1);
    let page = page.min(page_count - 1);
    let start = page * per_page;
    let end = (start + per_page).min(total);
    let items = items.get(start..end).unwrap_or_default().to_vec();
    Page {
        items,
        page,
        page_count,
        total,
        per_page,
    }
}
