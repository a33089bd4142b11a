use std::collections::HashMap;

/// Decode an `application/x-www-form-urlencoded` string (query or body).
///
/// `+` decodes to a space. Only the last value of a repeated key is kept.
pub fn parse_pairs(encoded: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in encoded.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match param.find('=') {
            Some(eq_idx) => (&param[..eq_idx], &param[eq_idx + 1..]),
            // Flag parameter without value
            None => (param, ""),
        };
        params.insert(decode_component(key), decode_component(value));
    }

    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Parse query parameters from a URI string
///
/// # Example
/// ```
/// use microblog::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/login?next=%2Findex&page=2");
/// assert_eq!(params.get("next"), Some(&"/index".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    match uri.find('?') {
        Some(query_start) => parse_pairs(&uri[query_start + 1..]),
        None => HashMap::new(),
    }
}

/// Parse a urlencoded request body.
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    parse_pairs(&String::from_utf8_lossy(body))
}

/// Get a string parameter, empty when absent
pub fn get_string(params: &HashMap<String, String>, key: &str) -> String {
    params.get(key).cloned().unwrap_or_default()
}

/// Checkbox semantics: present and not an explicit false value.
pub fn get_bool_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .map(|v| !matches!(v.as_str(), "false" | "0" | "off"))
        .unwrap_or(false)
}
