/// Counter-store key for one client's window bucket.
pub fn format_window_key(client_key: &str, bucket: i64) -> String {
    format!("rate:{}:{}", client_key, bucket)
}

/// Client address as reported by a fronting proxy, if any: first entry of
/// `X-Forwarded-For`, trimmed.
pub fn forwarded_client_ip(header: &str) -> Option<String> {
    header
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
