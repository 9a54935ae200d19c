//! Small/large task tagging.
//!
//! The tag decides queue priority only; it is a name-shape guess, not a size
//! measurement. The default covers thumbnail naming conventions plus the
//! leading stretch of a numbered image batch. Workloads with different naming
//! pass their own predicate on the batch context.

use std::sync::Arc;

use crate::url_model::basename;

/// Predicate deciding whether a URL is queued with small-file priority.
pub type SmallTag = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The default tagging rules, applied to the URL's basename.
pub fn default_small_tag() -> SmallTag {
    Arc::new(|url| is_small_name(basename(url)))
}

fn is_small_name(name: &str) -> bool {
    name.contains("thumb")
        || name.contains("_s")
        || name.contains("_small")
        || name.ends_with("_128.jpg")
        || numbered_image_at_most(name, 16)
}

/// True for `img_DDD.jpg` (exactly three digits) with DDD ≤ `max`.
fn numbered_image_at_most(name: &str, max: u32) -> bool {
    let Some(digits) = name
        .strip_prefix("img_")
        .and_then(|rest| rest.strip_suffix(".jpg"))
    else {
        return false;
    };
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    digits.parse::<u32>().map(|n| n <= max).unwrap_or(false)
}
