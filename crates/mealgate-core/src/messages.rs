// ── Scan messages ──
//
// English text comes from `ErrorCode::default_message`. Venues may add a
// second-language text per code (or for `ALLOW`); anything not overridden
// falls back to English.

use std::collections::HashMap;

use crate::model::ErrorCode;

const ALLOW_KEY: &str = "ALLOW";
const ALLOW_MESSAGE: &str = "Access granted, enjoy your meal";

#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    localized: HashMap<String, String>,
}

impl MessageCatalog {
    /// Keys are error code names (`CARD_EXPIRED`, ...) or `ALLOW`,
    /// matched case-insensitively.
    pub fn new(localized: HashMap<String, String>) -> Self {
        Self {
            localized: localized
                .into_iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect(),
        }
    }

    pub fn message(&self, code: Option<ErrorCode>) -> &str {
        code.map_or(ALLOW_MESSAGE, ErrorCode::default_message)
    }

    pub fn localized(&self, code: Option<ErrorCode>) -> &str {
        let key = code.map_or_else(|| ALLOW_KEY.to_owned(), |c| c.to_string());
        self.localized
            .get(&key)
            .map_or_else(|| self.message(code), String::as_str)
    }
}
