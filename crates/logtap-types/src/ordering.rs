//! Total orders over collected messages
//!
//! Both functions are meant for `slice::sort_by`, which is stable, so
//! messages with equal keys keep their collected order.

use std::cmp::Ordering;

use crate::Message;

/// Order by identifier (arrival/finalization order)
pub fn by_id(a: &Message, b: &Message) -> Ordering {
    a.id().cmp(&b.id())
}

/// Order by the timestamp recorded in the entry header
///
/// Entries without a timestamp sort first.
pub fn by_timestamp(a: &Message, b: &Message) -> Ordering {
    a.timestamp().cmp(&b.timestamp())
}
