//! Archive provider names and the global default priority.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Wayback,
    Ghost,
    Memento,
    Arquivo,
    Ukwa,
    #[serde(alias = "archive-today", alias = "archive_today")]
    ArchiveToday,
    Perma,
}

impl ProviderName {
    /// Global fallback order used when neither the caller nor the site names one.
    pub const DEFAULT_ORDER: [ProviderName; 7] = [
        ProviderName::Wayback,
        ProviderName::Ghost,
        ProviderName::Memento,
        ProviderName::Arquivo,
        ProviderName::Ukwa,
        ProviderName::ArchiveToday,
        ProviderName::Perma,
    ];

    /// Parses a provider name, case-insensitively. Accepts the hyphenated and
    /// underscored spellings of archive.today.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wayback" => Some(Self::Wayback),
            "ghost" => Some(Self::Ghost),
            "memento" => Some(Self::Memento),
            "arquivo" => Some(Self::Arquivo),
            "ukwa" => Some(Self::Ukwa),
            "archivetoday" | "archive-today" | "archive_today" => Some(Self::ArchiveToday),
            "perma" => Some(Self::Perma),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wayback => "wayback",
            Self::Ghost => "ghost",
            Self::Memento => "memento",
            Self::Arquivo => "arquivo",
            Self::Ukwa => "ukwa",
            Self::ArchiveToday => "archivetoday",
            Self::Perma => "perma",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a comma-separated provider list, returning the names that were not
/// recognized alongside the parsed ones.
#[must_use]
pub fn parse_provider_list(raw: &str) -> (Vec<ProviderName>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match ProviderName::parse(part) {
            Some(name) => known.push(name),
            None => unknown.push(part.to_string()),
        }
    }
    (known, unknown)
}
