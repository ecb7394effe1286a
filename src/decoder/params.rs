//! Per-request session parameters and the query-string parser.

use crate::defaults;
use crate::error::{Result, VoxgateError};
use percent_encoding::percent_decode_str;
use tracing::debug;

/// Parameters fixed at the start of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Number of results to return, within `[NBEST_MIN, NBEST_MAX]`.
    pub nbest: u32,
    /// Spacing of intermediate results in ms; 0 disables them.
    pub intermediate_ms: u32,
    pub do_endpointing: bool,
    pub multipart: bool,
    /// Optional decoding graph or phrase set handed to the engine.
    pub phrase: Option<String>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            nbest: defaults::NBEST_MIN,
            intermediate_ms: 0,
            do_endpointing: false,
            multipart: false,
            phrase: None,
        }
    }
}

impl SessionParams {
    /// Parameters seeded from the server-wide defaults.
    pub fn with_defaults(multipart: bool, do_endpointing: bool) -> Self {
        Self {
            multipart,
            do_endpointing,
            ..Self::default()
        }
    }

    /// Clamp a requested result count to the supported range.
    pub fn set_nbest(&mut self, requested: i64) {
        self.nbest = requested.clamp(defaults::NBEST_MIN as i64, defaults::NBEST_MAX as i64) as u32;
    }

    /// Non-positive values disable intermediates; positive values are raised
    /// to the minimum spacing.
    pub fn set_intermediate(&mut self, requested_ms: i64) {
        self.intermediate_ms = if requested_ms > 0 {
            requested_ms
                .max(defaults::INTERMEDIATE_MIN_MS as i64)
                .min(u32::MAX as i64) as u32
        } else {
            0
        };
    }

    /// Apply a query string on top of `self`.
    ///
    /// Unknown names are ignored. A recognized name with a malformed value is
    /// an error.
    pub fn apply_query(mut self, query: &str) -> Result<Self> {
        for (name, value) in parse_query(query) {
            match name.as_str() {
                "nbest" => self.set_nbest(parse_int(&name, &value)?),
                "intermediate" => self.set_intermediate(parse_int(&name, &value)?),
                "endofspeech" => self.do_endpointing = parse_bool(&name, &value)?,
                "multipart" => self.multipart = parse_bool(&name, &value)?,
                "phrase" => {
                    let phrase = percent_decode(&value);
                    self.phrase = (!phrase.is_empty()).then_some(phrase);
                }
                _ => debug!("Ignoring unknown parameter {:?}={:?}", name, value),
            }
        }
        Ok(self)
    }
}

/// Split a query string into name/value pairs.
///
/// A leading `?` is skipped. Pairs are separated by `&`; name and value by
/// the first `=`. A trailing `&` does not start another pair. Values are
/// returned undecoded.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    let query = query.strip_prefix('?').unwrap_or(query);
    if query.is_empty() {
        return Vec::new();
    }
    let mut parts: Vec<&str> = query.split('&').collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    parts
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn parse_int(name: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid(name, value))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn invalid(name: &str, value: &str) -> VoxgateError {
    VoxgateError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Decode `+` and `%XX` escapes. Invalid escapes are kept literally.
fn percent_decode(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(query: &str) -> Vec<(String, String)> {
        parse_query(query)
    }

    fn pair(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_parse_query_empty_inputs() {
        assert!(pairs("").is_empty());
        assert!(pairs("?").is_empty());
    }

    #[test]
    fn test_parse_query_edge_cases() {
        assert_eq!(pairs("?&"), vec![pair("", "")]);
        assert_eq!(pairs("a&&b"), vec![pair("a", ""), pair("", ""), pair("b", "")]);
        assert_eq!(pairs("?=value"), vec![pair("", "value")]);
        assert_eq!(pairs("?name="), vec![pair("name", "")]);
        assert_eq!(pairs("?name=v=u"), vec![pair("name", "v=u")]);
        assert_eq!(pairs("name"), vec![pair("name", "")]);
    }

    #[test]
    fn test_parse_query_multiple_pairs() {
        assert_eq!(
            pairs("?nbest=3&intermediate=500"),
            vec![pair("nbest", "3"), pair("intermediate", "500")]
        );
    }

    #[test]
    fn test_nbest_is_clamped() {
        let mut params = SessionParams::default();
        for (requested, expected) in [(0, 1), (1, 1), (10, 10), (15, 10), (-4, 1)] {
            params.set_nbest(requested);
            assert_eq!(params.nbest, expected, "nbest={}", requested);
        }
    }

    #[test]
    fn test_intermediate_is_floored_or_disabled() {
        let mut params = SessionParams::default();
        params.set_intermediate(100);
        assert_eq!(params.intermediate_ms, 500);
        params.set_intermediate(750);
        assert_eq!(params.intermediate_ms, 750);
        params.set_intermediate(0);
        assert_eq!(params.intermediate_ms, 0);
        params.set_intermediate(-20);
        assert_eq!(params.intermediate_ms, 0);
    }

    #[test]
    fn test_apply_query_sets_every_parameter() {
        let params = SessionParams::default()
            .apply_query("?nbest=3&intermediate=100&endofspeech=1&multipart=true&phrase=yes+no")
            .unwrap();
        assert_eq!(
            params,
            SessionParams {
                nbest: 3,
                intermediate_ms: 500,
                do_endpointing: true,
                multipart: true,
                phrase: Some("yes no".to_string()),
            }
        );
    }

    #[test]
    fn test_apply_query_keeps_server_defaults() {
        let params = SessionParams::with_defaults(true, true)
            .apply_query("?nbest=2")
            .unwrap();
        assert!(params.multipart);
        assert!(params.do_endpointing);
        let params = SessionParams::with_defaults(true, true)
            .apply_query("multipart=0&endofspeech=off")
            .unwrap();
        assert!(!params.multipart);
        assert!(!params.do_endpointing);
    }

    #[test]
    fn test_empty_boolean_value_means_true() {
        let params = SessionParams::default().apply_query("?multipart").unwrap();
        assert!(params.multipart);
    }

    #[test]
    fn test_unknown_parameters_are_ignored() {
        let params = SessionParams::default()
            .apply_query("?color=blue&&=x&nbest=2")
            .unwrap();
        assert_eq!(params.nbest, 2);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        match SessionParams::default().apply_query("?nbest=many") {
            Err(VoxgateError::InvalidParameter { name, value }) => {
                assert_eq!(name, "nbest");
                assert_eq!(value, "many");
            }
            other => panic!("Expected InvalidParameter, got {:?}", other),
        }
        assert!(SessionParams::default().apply_query("?multipart=maybe").is_err());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("caf%C3%A9+au+lait"), "café au lait");
        assert_eq!(percent_decode("%41%42"), "AB");
    }
}
