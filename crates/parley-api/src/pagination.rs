use axum::http::Uri;
use serde::Deserialize;

use parley_types::api::Page;

use crate::links::RequestBase;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 200;

/// Raw `limit`/`offset` query values. Kept as strings so bad input falls back
/// to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub offset: i64,
    pub limit: i64,
}

impl PageParams {
    pub fn from_raw(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = limit
            .and_then(parse_int)
            .filter(|l| *l > 0)
            .map(|l| l.min(MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);
        let offset = offset.and_then(parse_int).filter(|o| *o >= 0).unwrap_or(0);
        Self { offset, limit }
    }
}

impl From<&PageQuery> for PageParams {
    fn from(query: &PageQuery) -> Self {
        Self::from_raw(query.limit.as_deref(), query.offset.as_deref())
    }
}

/// Lenient integer parse: surrounding whitespace is allowed, anything else
/// that is not an integer yields `None`.
pub fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Wrap one page of results with its total and neighbour links.
pub fn paginate<T>(results: Vec<T>, count: usize, params: PageParams, uri: &Uri, base: &RequestBase) -> Page<T> {
    let count_i = i64::try_from(count).unwrap_or(i64::MAX);
    let next_offset = params.offset.saturating_add(params.limit);

    let next = (next_offset < count_i).then(|| page_link(uri, base, params.limit, Some(next_offset)));

    let previous = (params.offset > 0).then(|| {
        let offset = params.offset - params.limit;
        page_link(uri, base, params.limit, (offset > 0).then_some(offset))
    });

    Page {
        count,
        next,
        previous,
        results,
    }
}

/// The current request URL with `limit` replaced and `offset` replaced or
/// removed. Other query parameters are carried over untouched.
fn page_link(uri: &Uri, base: &RequestBase, limit: i64, offset: Option<i64>) -> String {
    let mut pairs: Vec<String> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            key != "limit" && key != "offset"
        })
        .map(str::to_string)
        .collect();

    pairs.push(format!("limit={limit}"));
    if let Some(offset) = offset {
        pairs.push(format!("offset={offset}"));
    }

    base.absolute(&format!("{}?{}", uri.path(), pairs.join("&")))
}
