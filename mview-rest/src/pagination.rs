//! Pagination engine
//!
//! `paginate` is a pure function of (total, limit, page). The page-count rule
//! `max(floor(total / limit), 2 if total > limit else 1)` is kept exactly as
//! clients observe it, including the case where it reports fewer pages than
//! the rows would need (e.g. 25 rows at 10 per page reports 2 pages, the
//! second carrying 15 rows).

use serde_json::{Map, Value};

/// Page size when pagination is active without a usable `_limit`
pub const DEFAULT_LIMIT: i64 = 10;

/// Paging metadata for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingMeta {
    pub total_entities: usize,
    pub page_count: usize,
    /// Current page, clamped to `[1, page_count]`
    pub page_number: usize,
    pub number_per_page: usize,
    pub number_returned: usize,
    pub next_page: Option<usize>,
    pub previous_page: Option<usize>,
}

/// Slice bounds plus metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub count: usize,
    pub meta: PagingMeta,
}

impl Page {
    /// Apply the slice bounds to a fully materialized set
    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let start = self.offset.min(rows.len());
        let end = self.offset.saturating_add(self.count).min(rows.len());
        &rows[start..end]
    }
}

/// Compute slice bounds and metadata
///
/// A missing or non-positive `limit` becomes [`DEFAULT_LIMIT`]; a missing page
/// becomes 1. Pages past the end clamp to the last page and pages below 1
/// clamp to 1.
pub fn paginate(total: usize, limit: Option<i64>, page: Option<i64>) -> Page {
    let limit = match limit {
        Some(l) if l > 0 => l,
        _ => DEFAULT_LIMIT,
    };
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let requested = usize::try_from(page.unwrap_or(1).max(1)).unwrap_or(usize::MAX);

    let page_count = (total / limit).max(if total > limit { 2 } else { 1 });
    let page_number = requested.min(page_count);
    let offset = limit.saturating_mul(page_number - 1);

    let count = if page_number == page_count && page_number > 1 && total > offset {
        total - offset
    } else {
        limit
    };

    Page {
        offset,
        count,
        meta: PagingMeta {
            total_entities: total,
            page_count,
            page_number,
            number_per_page: limit,
            number_returned: count,
            next_page: (page_number < page_count).then(|| page_number + 1),
            previous_page: (page_number > 1).then(|| page_number - 1),
        },
    }
}

/// Build a link under `root/path/`; the bare `append` when there is no root
pub fn hyperlink(root: &str, path: &str, append: &str) -> String {
    if root.is_empty() {
        append.to_string()
    } else {
        format!("{}/{}/{}", root, path.trim_matches('/'), append)
    }
}

fn page_link(root: &str, path: &str, page: usize, limit: usize) -> Value {
    Value::String(hyperlink(
        root,
        path,
        &format!("?_page={page}&_limit={limit}"),
    ))
}

impl PagingMeta {
    /// Paging fields merged into the response envelope
    pub fn to_document(&self, root: &str, path: &str) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("page_count".into(), self.page_count.into());
        doc.insert(
            "last_page".into(),
            page_link(root, path, self.page_count, self.number_per_page),
        );
        doc.insert("page_number".into(), self.page_number.into());
        doc.insert("total_entities".into(), self.total_entities.into());
        doc.insert("number_per_page".into(), self.number_per_page.into());
        doc.insert("number_returned".into(), self.number_returned.into());
        doc.insert(
            "next".into(),
            self.next_page
                .map_or(Value::Null, |p| page_link(root, path, p, self.number_per_page)),
        );
        doc.insert(
            "previous".into(),
            self.previous_page
                .map_or(Value::Null, |p| page_link(root, path, p, self.number_per_page)),
        );
        doc
    }
}
