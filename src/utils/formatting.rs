/// Replaces `:key` placeholders in a single pass, so substituted values are never
/// scanned again. The longest matching key wins.
pub fn apply_pattern_string(pattern: &str, vars: &[(&str, &str)]) -> String {
    let mut keys: Vec<&(&str, &str)> = vars.iter().filter(|(key, _)| !key.is_empty()).collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(idx) = rest.find(':') {
        result.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        match keys.iter().find(|(key, _)| after.starts_with(key)) {
            Some((key, value)) => {
                result.push_str(value);
                rest = &after[key.len()..];
            }
            None => {
                result.push(':');
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Cuts `value` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Shortens a file name to `max_chars`, keeping the extension when there is room for it.
pub fn shorten_file_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }

    if let Some((stem, ext)) = name.rsplit_once('.') {
        let ext_len = ext.chars().count() + 1;
        if !stem.is_empty() && ext_len < max_chars {
            let stem = truncate_chars(stem, max_chars - ext_len);
            return format!("{stem}.{ext}");
        }
    }

    truncate_chars(name, max_chars).to_string()
}
