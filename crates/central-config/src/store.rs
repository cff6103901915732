use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Room store implementations the server can be assembled with.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StoreBackend {
    /// Shared Postgres database reached through `database_url`.
    #[default]
    Postgres,
    /// Process-local store; state is lost on restart.
    Memory,
}

/// Errors encountered while parsing a [`StoreBackend`] from text.
pub type StoreBackendParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("postgres", StoreBackend::Postgres)]
    #[case("MEMORY", StoreBackend::Memory)]
    fn parses_case_insensitively(#[case] input: &str, #[case] expected: StoreBackend) {
        assert_eq!(input.parse::<StoreBackend>().expect("parse backend"), expected);
    }

    #[rstest]
    fn rejects_unknown_backend() {
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
