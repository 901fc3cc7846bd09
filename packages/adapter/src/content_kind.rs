//! Content-type dispatch as an explicit tagged enum, computed once from the
//! `Content-Type` header — replaces the original's
//! `try: json.loads(body) except: ...` control flow (see spec.md §9) with a
//! `match` over a parsed top-level media type.

const BINARY_PREFIXES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/pdf",
    "application/zip",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    FormUrlEncoded,
    /// Matched a binary bypass prefix (built-in or configured); no
    /// adaptation is required.
    Binary,
    Other,
}

impl ContentKind {
    /// Classify a `Content-Type` header value. `extra_ignore_prefixes` is the
    /// operator-configured `IGNORE_CONTENT_TYPES` list (§6), checked after
    /// the built-in binary prefixes.
    pub fn classify(content_type: &str, extra_ignore_prefixes: &[String]) -> Self {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();

        if BINARY_PREFIXES.iter().any(|p| media_type.starts_with(p)) {
            return ContentKind::Binary;
        }
        if extra_ignore_prefixes
            .iter()
            .any(|p| media_type.starts_with(p.to_ascii_lowercase().as_str()))
        {
            return ContentKind::Binary;
        }

        match media_type.as_str() {
            "application/json" => ContentKind::Json,
            "application/x-www-form-urlencoded" => ContentKind::FormUrlEncoded,
            _ => ContentKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_json() {
        assert_eq!(
            ContentKind::classify("application/json; charset=utf-8", &[]),
            ContentKind::Json
        );
    }

    #[test]
    fn classifies_form_urlencoded() {
        assert_eq!(
            ContentKind::classify("application/x-www-form-urlencoded", &[]),
            ContentKind::FormUrlEncoded
        );
    }

    #[test]
    fn builtin_binary_prefixes_bypass() {
        for ct in ["image/png", "video/mp4", "audio/mpeg", "application/pdf", "application/zip"] {
            assert_eq!(ContentKind::classify(ct, &[]), ContentKind::Binary);
        }
    }

    #[test]
    fn configured_ignore_prefix_bypasses() {
        let ignore = vec!["application/octet-stream".to_string()];
        assert_eq!(
            ContentKind::classify("application/octet-stream", &ignore),
            ContentKind::Binary
        );
    }

    #[test]
    fn unknown_type_falls_back_to_other() {
        assert_eq!(ContentKind::classify("text/plain", &[]), ContentKind::Other);
    }
}
