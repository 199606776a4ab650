//! `Accept` and `Content-Type` header parsing.

use std::collections::BTreeMap;

/// One media range of an `Accept` header.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaRange {
    pub kind: String,
    pub subtype: String,
    pub quality: f32,
}

impl MediaRange {
    /// 2 for `type/subtype`, 1 for `type/*`, 0 for `*/*`; `None` if the range
    /// doesn't cover `mime`.
    fn specificity(&self, kind: &str, subtype: &str) -> Option<u8> {
        if self.kind == "*" {
            Some(0)
        } else if !self.kind.eq_ignore_ascii_case(kind) {
            None
        } else if self.subtype == "*" {
            Some(1)
        } else if self.subtype.eq_ignore_ascii_case(subtype) {
            Some(2)
        } else {
            None
        }
    }
}

/// Parses an `Accept` header. Malformed ranges are skipped; a bare `*` is
/// read as `*/*`.
pub fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .filter_map(|item| {
            let mut params = item.split(';');
            let mime = params.next()?.trim();
            let (kind, subtype) = match mime {
                "*" => ("*", "*"),
                m => m.split_once('/')?,
            };
            if kind.is_empty() || subtype.is_empty() {
                return None;
            }
            let quality = params
                .filter_map(|p| p.split_once('='))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("q"))
                .and_then(|(_, v)| v.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            Some(MediaRange {
                kind: kind.trim().to_ascii_lowercase(),
                subtype: subtype.trim().to_ascii_lowercase(),
                quality,
            })
        })
        .collect()
}

/// Picks the candidate the client prefers.
///
/// Each candidate takes the quality of the most specific range covering it.
/// The highest non-zero quality wins; ties go to the earlier candidate.
pub fn best_match<'a>(accept: &[MediaRange], candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<(&str, f32)> = None;
    for candidate in candidates {
        let Some((kind, subtype)) = candidate.split_once('/') else { continue };
        let quality = accept
            .iter()
            .filter_map(|r| r.specificity(kind, subtype).map(|s| (s, r.quality)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, q)| q);
        match (quality, best) {
            (Some(q), _) if q <= 0.0 => {}
            (Some(q), Some((_, bq))) if q <= bq => {}
            (Some(q), _) => best = Some((candidate, q)),
            (None, _) => {}
        }
    }
    best.map(|(c, _)| c)
}

/// Splits a header such as `application/json; charset=utf-8` into the
/// lowercased value and its parameters. Parameter names are lowercased and
/// quoted values unquoted.
pub fn parse_options_header(header: &str) -> (String, BTreeMap<String, String>) {
    let mut items = header.split(';');
    let value = items.next().unwrap_or_default().trim().to_ascii_lowercase();
    let options = items
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_ascii_lowercase(),
                v.trim().trim_matches('"').to_owned(),
            )
        })
        .collect();
    (value, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_higher_quality() {
        let accept = parse_accept("text/plain;q=0.5, application/json");
        assert_eq!(best_match(&accept, ["text/plain", "application/json"]), Some("application/json"));
    }

    #[test]
    fn specific_range_overrides_wildcard() {
        let accept = parse_accept("*/*;q=0.8, text/plain;q=0");
        assert_eq!(best_match(&accept, ["text/plain"]), None);
        assert_eq!(best_match(&accept, ["text/plain", "application/json"]), Some("application/json"));
    }

    #[test]
    fn type_wildcard_matches_subtypes() {
        let accept = parse_accept("application/*");
        assert_eq!(best_match(&accept, ["text/plain", "application/xml"]), Some("application/xml"));
        assert_eq!(best_match(&parse_accept("image/png"), ["application/json"]), None);
    }

    #[test]
    fn options_header_parameters() {
        let (mime, opts) = parse_options_header("Application/JSON; Charset=\"UTF-8\"");
        assert_eq!(mime, "application/json");
        assert_eq!(opts.get("charset").map(String::as_str), Some("UTF-8"));
    }
}
