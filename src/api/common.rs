//! Common API utilities and shared query types

use serde::Deserialize;
use std::str::FromStr;

use crate::models::ListParams;

pub fn default_page() -> u32 {
    1
}

pub fn default_per_page() -> u32 {
    20
}

/// `?page=&per_page=`, clamped when converted
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

/// Parse an optional query value; blank or malformed input counts as absent
pub fn parse_optional<T: FromStr>(value: Option<&str>) -> Option<T> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}
