// Currency conversion and price formatting on top of the rate cache

use thiserror::Error;
use tracing::debug;

use crate::currency::CurrencyProfile;
use crate::rate_cache::{normalize_code, RateCache};

#[derive(Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("Unsupported display locale: {0}")]
    UnsupportedLocale(String),

    #[error("Cannot format non-finite amount {0}")]
    NonFiniteAmount(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SymbolPosition {
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, Copy)]
struct LocaleFormat {
    group_separator: &'static str,
    decimal_separator: &'static str,
    symbol_position: SymbolPosition,
}

const ENGLISH: LocaleFormat = LocaleFormat {
    group_separator: ",",
    decimal_separator: ".",
    symbol_position: SymbolPosition::Prefix,
};

const CONTINENTAL: LocaleFormat = LocaleFormat {
    group_separator: ".",
    decimal_separator: ",",
    symbol_position: SymbolPosition::Suffix,
};

const FRENCH: LocaleFormat = LocaleFormat {
    group_separator: "\u{202f}",
    decimal_separator: ",",
    symbol_position: SymbolPosition::Suffix,
};

const SOUTH_AFRICAN: LocaleFormat = LocaleFormat {
    group_separator: "\u{a0}",
    decimal_separator: ",",
    symbol_position: SymbolPosition::Prefix,
};

// Exact tags first, then bare language subtags
fn locale_format(locale: &str) -> Result<LocaleFormat, FormatError> {
    let tag = locale.trim().replace('_', "-").to_ascii_lowercase();
    let exact = match tag.as_str() {
        "en-za" => Some(SOUTH_AFRICAN),
        "de-ch" => Some(LocaleFormat {
            group_separator: "’",
            decimal_separator: ".",
            symbol_position: SymbolPosition::Prefix,
        }),
        _ => None,
    };
    if let Some(format) = exact {
        return Ok(format);
    }

    let language = tag.split('-').next().unwrap_or_default();
    match language {
        "en" | "ja" | "zh" | "ko" => Ok(ENGLISH),
        "de" | "es" | "it" | "nl" | "pt" | "id" | "tr" => Ok(CONTINENTAL),
        "fr" => Ok(FRENCH),
        _ => Err(FormatError::UnsupportedLocale(locale.to_string())),
    }
}

/// Rounds to 2 decimals, halves away from zero (half-up for the non-negative amounts prices use;
/// -1.005 becomes -1.01). The intermediate snap to 1e-8 stops values like 1.005
/// (stored as 1.00499999...) from rounding down.
pub fn round_money(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scaled = value * 100.0;
    let snapped = (scaled * 1e8).round() / 1e8;
    snapped.round() / 100.0
}

fn group_digits(mut integer: u64, separator: &str) -> String {
    let mut groups = Vec::new();
    loop {
        let chunk = integer % 1000;
        integer /= 1000;
        if integer == 0 {
            groups.push(chunk.to_string());
            break;
        }
        groups.push(format!("{:03}", chunk));
    }
    groups.reverse();
    groups.join(separator)
}

// Returns (is_negative, grouped number with 2 fraction digits)
fn grouped_number(amount: f64, group: &str, decimal: &str) -> (bool, String) {
    let rounded = round_money(amount);
    let cents = (rounded.abs() * 100.0).round() as u64;
    let negative = rounded < 0.0 && cents > 0;
    let number = format!(
        "{}{}{:02}",
        group_digits(cents / 100, group),
        decimal,
        cents % 100
    );
    (negative, number)
}

fn needs_space(symbol: &str) -> bool {
    symbol
        .chars()
        .last()
        .map_or(false, |c| c.is_alphabetic())
}

fn format_with_locale(amount: f64, profile: &CurrencyProfile) -> Result<String, FormatError> {
    if !amount.is_finite() {
        return Err(FormatError::NonFiniteAmount(amount));
    }
    let locale = locale_format(profile.display_locale)?;
    let (negative, number) =
        grouped_number(amount, locale.group_separator, locale.decimal_separator);
    let sign = if negative { "-" } else { "" };

    let rendered = match locale.symbol_position {
        SymbolPosition::Prefix if needs_space(profile.symbol) => {
            format!("{}{} {}", sign, profile.symbol, number)
        }
        SymbolPosition::Prefix => format!("{}{}{}", sign, profile.symbol, number),
        SymbolPosition::Suffix => format!("{}{}\u{a0}{}", sign, number, profile.symbol),
    };
    Ok(rendered)
}

// Plain "symbol + grouped number" rendering used when the locale can't be honoured
fn format_fallback(amount: f64, profile: &CurrencyProfile) -> String {
    let amount = if amount.is_finite() { amount } else { 0.0 };
    let (negative, number) = grouped_number(amount, ",", ".");
    let sign = if negative { "-" } else { "" };
    format!("{}{}{}", sign, profile.symbol, number)
}

#[derive(Clone)]
pub struct ConversionService {
    rates: RateCache,
}

impl ConversionService {
    pub fn new(rates: RateCache) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &RateCache {
        &self.rates
    }

    // Zero or broken rates must never turn into a division by zero
    fn safe_rate(&self, code: &str) -> f64 {
        let rate = self.rates.get_rate(code);
        if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            1.0
        }
    }

    /// Converts `amount` between two currencies via the base currency, rounded to 2 decimals.
    /// Same-currency conversion returns the amount untouched.
    pub fn convert(&self, amount: f64, from: &str, to: &str) -> f64 {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from == to {
            return amount;
        }

        let base = self.rates.base_currency();
        let in_base = if from == base {
            amount
        } else {
            amount / self.safe_rate(&from)
        };
        let result = if to == base {
            in_base
        } else {
            in_base * self.safe_rate(&to)
        };
        round_money(result)
    }

    pub fn format(&self, amount: f64, profile: &CurrencyProfile) -> String {
        match format_with_locale(amount, profile) {
            Ok(rendered) => rendered,
            Err(e) => {
                debug!(currency = profile.code, error = %e, "locale formatting failed, using fallback");
                format_fallback(amount, profile)
            }
        }
    }

    pub fn convert_and_format(&self, amount: f64, from: &str, profile: &CurrencyProfile) -> String {
        let converted = self.convert(amount, from, profile.code);
        self.format(converted, profile)
    }
}
