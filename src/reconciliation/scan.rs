//! Collection codes printed on pickup slips.

use url::Url;

use crate::domain::value_objects::OrderId;

/// Accepts a bare order id, or a URL carrying it as `?order=`/`?order_id=` or as a path segment.
pub fn parse_collection_code(code: &str) -> Option<OrderId> {
    let code = code.trim();
    if let Ok(id) = code.parse::<OrderId>() {
        return Some(id);
    }
    let url = Url::parse(code).ok()?;
    let from_query = url.query_pairs()
        .find(|(k, _)| k == "order" || k == "order_id")
        .and_then(|(_, v)| v.parse::<OrderId>().ok());
    from_query.or_else(|| url.path_segments()?.rev().find_map(|s| s.parse::<OrderId>().ok()))
}
