//! URL construction and naming for image batches.

/// Strip trailing slashes from a base URL so joins are unambiguous.
pub fn normalize_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Name of the i-th object in a batch (1-based): `img_001.jpg`.
pub fn image_name(index: usize) -> String {
    format!("img_{:03}.jpg", index)
}

/// Full URLs for a batch of `count` objects under `base_url`.
pub fn batch_urls(base_url: &str, count: usize) -> Vec<String> {
    let base = normalize_base(base_url);
    (1..=count)
        .map(|i| format!("{}/{}", base, image_name(i)))
        .collect()
}

/// Final path segment of a URL (the URL itself when it has no slash).
pub fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
