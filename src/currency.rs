// Currency reference data used by the currency selector and the price formatter

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CurrencyProfile {
    pub code: &'static str,
    pub symbol: &'static str,
    pub display_locale: &'static str,
    pub language_tag: &'static str,
}

pub const USD: CurrencyProfile = CurrencyProfile {
    code: "USD",
    symbol: "$",
    display_locale: "en-US",
    language_tag: "en",
};

pub const PROFILES: &[CurrencyProfile] = &[
    USD,
    CurrencyProfile {
        code: "EUR",
        symbol: "€",
        display_locale: "de-DE",
        language_tag: "de",
    },
    CurrencyProfile {
        code: "GBP",
        symbol: "£",
        display_locale: "en-GB",
        language_tag: "en",
    },
    CurrencyProfile {
        code: "GHS",
        symbol: "GH₵",
        display_locale: "en-GH",
        language_tag: "en",
    },
    CurrencyProfile {
        code: "NGN",
        symbol: "₦",
        display_locale: "en-NG",
        language_tag: "en",
    },
    CurrencyProfile {
        code: "KES",
        symbol: "KSh",
        display_locale: "en-KE",
        language_tag: "en",
    },
    CurrencyProfile {
        code: "ZAR",
        symbol: "R",
        display_locale: "en-ZA",
        language_tag: "en",
    },
    CurrencyProfile {
        code: "CAD",
        symbol: "CA$",
        display_locale: "en-CA",
        language_tag: "en",
    },
    CurrencyProfile {
        code: "XOF",
        symbol: "CFA",
        display_locale: "fr-SN",
        language_tag: "fr",
    },
    CurrencyProfile {
        code: "AED",
        symbol: "AED",
        display_locale: "en-AE",
        language_tag: "en",
    },
];

// ISO 3166 alpha-2 country -> currency code offered by the country selector
const COUNTRY_CURRENCIES: &[(&str, &str)] = &[
    ("US", "USD"),
    ("GH", "GHS"),
    ("NG", "NGN"),
    ("KE", "KES"),
    ("ZA", "ZAR"),
    ("GB", "GBP"),
    ("DE", "EUR"),
    ("FR", "EUR"),
    ("ES", "EUR"),
    ("IT", "EUR"),
    ("NL", "EUR"),
    ("IE", "EUR"),
    ("CA", "CAD"),
    ("SN", "XOF"),
    ("CI", "XOF"),
    ("AE", "AED"),
];

impl CurrencyProfile {
    pub fn by_code(code: &str) -> Option<CurrencyProfile> {
        let code = code.trim();
        PROFILES
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .copied()
    }

    /// Profile for a country picked in the selector. Countries we don't price in get USD.
    pub fn for_country(country: &str) -> CurrencyProfile {
        let country = country.trim();
        COUNTRY_CURRENCIES
            .iter()
            .find(|(iso, _)| iso.eq_ignore_ascii_case(country))
            .and_then(|(_, code)| Self::by_code(code))
            .unwrap_or(USD)
    }

    pub fn all() -> &'static [CurrencyProfile] {
        PROFILES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("gh", "GHS"; "ghana lower case")]
    #[test_case("NG", "NGN"; "nigeria")]
    #[test_case("FR", "EUR"; "eurozone")]
    #[test_case("JP", "USD"; "unpriced country falls back")]
    #[test_case("", "USD"; "empty input")]
    fn test_for_country(country: &str, expected: &str) {
        assert_eq!(CurrencyProfile::for_country(country).code, expected);
    }

    #[test]
    fn test_by_code_is_case_insensitive() {
        let profile = CurrencyProfile::by_code(" eur ").unwrap();
        assert_eq!(profile.symbol, "€");
        assert!(CurrencyProfile::by_code("XYZ").is_none());
    }

    #[test]
    fn test_every_country_maps_to_a_profile() {
        for (_, code) in COUNTRY_CURRENCIES {
            assert!(CurrencyProfile::by_code(code).is_some(), "{} missing", code);
        }
    }
}
