//! Symbol canonicalization (C1).
//!
//! Accepts any of the shapes a strategy or a venue might hand us — compact
//! `ETHUSDT`, slashed `ETH/USDT`, hyphenated `ETH-USDT`, perpetual-suffixed
//! `ETH-USDT-PERP`, ccxt-settle `ETH/USDT:USDT` — and produces compact and
//! hyphenated canonical forms.

/// Known quote assets, in the order spec.md lists them.
pub const QUOTES: &[&str] = &["USDT", "USDC", "BTC", "ETH", "USD", "EUR", "DAI", "FDUSD"];

/// Strip separators and a trailing `-PERP`/`:SETTLE` decoration, returning
/// `(base, quote)` for the *longest* suffix in `QUOTES` that matches
/// (e.g. `FDUSD` must win over the shorter `USD` for a symbol like
/// `XFDUSD`), or `None` if the uppercased, separator-stripped symbol
/// matches no known quote.
fn split_base_quote(input: &str) -> Option<(String, String)> {
    let upper = input.to_uppercase();
    // ccxt-settle form `ETH/USDT:USDT` - drop the settle suffix.
    let without_settle = upper.split(':').next().unwrap_or(&upper);
    // Drop a trailing perpetual decoration like `-PERP`.
    let without_perp = without_settle
        .strip_suffix("-PERP")
        .unwrap_or(without_settle);
    let compact: String = without_perp.chars().filter(|c| *c != '/' && *c != '-').collect();

    QUOTES
        .iter()
        .filter_map(|quote| {
            let base = compact.strip_suffix(quote)?;
            (!base.is_empty()).then(|| (base.to_string(), quote.to_string()))
        })
        .max_by_key(|(_, quote)| quote.len())
}

/// Produce the compact form (`ETHUSDT`, or `ETHUSDT-PERP` when
/// `perpetual` is set).
pub fn to_compact(input: &str, perpetual: bool) -> String {
    match split_base_quote(input) {
        Some((base, quote)) => {
            if perpetual {
                format!("{base}{quote}-PERP")
            } else {
                format!("{base}{quote}")
            }
        }
        None => input.to_uppercase(),
    }
}

/// Produce the canonical hyphenated form (`ETH-USDT`).
pub fn to_hyphen(input: &str) -> String {
    match split_base_quote(input) {
        Some((base, quote)) => format!("{base}-{quote}"),
        None => input.to_uppercase(),
    }
}

/// Produce the slashed form (`ETH/USDT`).
pub fn to_slashed(input: &str) -> String {
    match split_base_quote(input) {
        Some((base, quote)) => format!("{base}/{quote}"),
        None => input.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_round_trips_every_shape() {
        for s in [
            "ETHUSDT",
            "ETH/USDT",
            "ETH-USDT",
            "ETH-USDT-PERP",
            "ETH/USDT:USDT",
            "eth-usdt",
        ] {
            assert_eq!(to_compact(s, false), "ETHUSDT", "input: {s}");
            assert_eq!(to_hyphen(s), "ETH-USDT", "input: {s}");
        }
    }

    #[test]
    fn perpetual_suffix_is_added_on_request() {
        assert_eq!(to_compact("ETH-USDT", true), "ETHUSDT-PERP");
    }

    #[test]
    fn longest_match_prefers_usdt_over_usd() {
        // "BTCUSDT" must not be parsed as base "BTCUS" + quote "D"... and
        // must not spuriously match quote "USD" leaving base "BTCUS" + "T".
        assert_eq!(to_hyphen("BTCUSDT"), "BTC-USDT");
    }

    #[test]
    fn longest_match_prefers_fdusd_over_usd() {
        // "XFDUSD" ends in both "USD" and the longer "FDUSD"; the longer
        // quote must win even though "USD" appears earlier in QUOTES.
        assert_eq!(to_hyphen("XFDUSD"), "X-FDUSD");
        assert_eq!(to_compact("XFDUSD", false), "XFDUSD");
    }

    #[test]
    fn unknown_quote_falls_back_to_uppercase() {
        assert_eq!(to_hyphen("NOTAREALPAIR"), "NOTAREALPAIR");
    }

    #[test]
    fn slashed_form() {
        assert_eq!(to_slashed("ETH-USDT"), "ETH/USDT");
    }
}
