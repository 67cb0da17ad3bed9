//! Signal extractor: turns free-text chat messages into structured trade
//! intents.
//!
//! Supported message shapes look like:
//!
//! ```text
//! #METUSDT P | LONG 🟢
//! Entry: 0.2515 (CMP)
//! TP 1 → 0.2573
//! Stop Loss: 0.25
//! ```
//!
//! SL/TP stated in the message are captured as provenance only; the values
//! used for execution are always derived from the entry price and the
//! configured percentages.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::models::{Direction, ParsedSignal};

/// Quote assets a pair token must end with.
const QUOTE_ASSETS: [&str; 4] = ["USDT", "BUSD", "BTC", "ETH"];

/// Bullish / bearish marker glyphs used when the literal keyword is absent.
const BULLISH_MARK: char = '\u{1F7E2}'; // 🟢
const BEARISH_MARK: char = '\u{1F534}'; // 🔴

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no trading pair found in message")]
    MissingPair,
    #[error("no direction (LONG/SHORT) found in message")]
    MissingDirection,
    #[error("no entry price found in message")]
    MissingEntry,
}

/// Stateless extractor configured with the SL/TP percentages to derive with.
#[derive(Debug, Clone)]
pub struct SignalParser {
    sl_percentage: Decimal,
    tp_percentage: Decimal,
}

impl SignalParser {
    pub fn new(sl_percentage: Decimal, tp_percentage: Decimal) -> Self {
        Self {
            sl_percentage,
            tp_percentage,
        }
    }

    /// Extract a structured signal from raw message text.
    ///
    /// Pair, direction, and entry price are each required; any of them
    /// missing fails the whole extraction.
    pub fn parse(&self, text: &str) -> Result<ParsedSignal, ParseError> {
        let upper = text.to_ascii_uppercase();

        let pair = extract_pair(&upper).ok_or(ParseError::MissingPair)?;
        let direction = extract_direction(text, &upper).ok_or(ParseError::MissingDirection)?;
        let entry = extract_entry(&upper).ok_or(ParseError::MissingEntry)?;

        let stated_stop_loss = extract_stated_stop_loss(&upper);
        let stated_take_profit = extract_stated_take_profit(&upper);

        let (stop_loss, take_profit) = self.derive_sl_tp(entry, direction);

        Ok(ParsedSignal {
            pair,
            direction,
            entry,
            stop_loss,
            take_profit,
            stated_stop_loss,
            stated_take_profit,
        })
    }

    /// Derive stop-loss and take-profit from the entry price.
    ///
    /// LONG:  SL = E × (1 − sl%/100), TP = E × (1 + tp%/100)
    /// SHORT: SL = E × (1 + sl%/100), TP = E × (1 − tp%/100)
    ///
    /// Both rounded to 8 fractional digits.
    fn derive_sl_tp(&self, entry: Decimal, direction: Direction) -> (Decimal, Decimal) {
        let sl_mult = self.sl_percentage / dec!(100);
        let tp_mult = self.tp_percentage / dec!(100);

        let (sl, tp) = match direction {
            Direction::Long => (
                entry * (Decimal::ONE - sl_mult),
                entry * (Decimal::ONE + tp_mult),
            ),
            Direction::Short => (
                entry * (Decimal::ONE + sl_mult),
                entry * (Decimal::ONE - tp_mult),
            ),
        };
        (sl.round_dp(8), tp.round_dp(8))
    }
}

/// Find the trading pair: an alphanumeric token ending in a known quote
/// asset, optionally hashtag-prefixed and optionally carrying a perpetual
/// marker (`.P` suffix or bare trailing `P`).
///
/// `.P` is always stripped. A bare trailing `P` is stripped only when the
/// remainder still ends in a known quote asset, so a symbol legitimately
/// spelled with a final `P` (e.g. PERPUSDT, which already ends in USDT) is
/// left untouched.
fn extract_pair(upper: &str) -> Option<String> {
    for token in upper
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .filter(|t| !t.is_empty())
    {
        let tok = token.strip_suffix(".P").unwrap_or(token);
        let tok = tok.trim_end_matches('.');

        if ends_with_quote_asset(tok) {
            return Some(tok.to_string());
        }
        if let Some(stripped) = tok.strip_suffix('P') {
            if ends_with_quote_asset(stripped) {
                return Some(stripped.to_string());
            }
        }
    }
    None
}

fn ends_with_quote_asset(token: &str) -> bool {
    QUOTE_ASSETS
        .iter()
        .any(|q| token.ends_with(q) && token.len() > q.len())
        && token.chars().all(|c| c.is_ascii_alphanumeric())
}

/// First literal LONG/SHORT wins; otherwise exactly one of the directional
/// marker glyphs must be present.
fn extract_direction(text: &str, upper: &str) -> Option<Direction> {
    let long_at = find_word(upper, "LONG", 0);
    let short_at = find_word(upper, "SHORT", 0);

    match (long_at, short_at) {
        (Some(l), Some(s)) => {
            return Some(if l < s {
                Direction::Long
            } else {
                Direction::Short
            })
        }
        (Some(_), None) => return Some(Direction::Long),
        (None, Some(_)) => return Some(Direction::Short),
        (None, None) => {}
    }

    let bullish = text.contains(BULLISH_MARK);
    let bearish = text.contains(BEARISH_MARK);
    match (bullish, bearish) {
        (true, false) => Some(Direction::Long),
        (false, true) => Some(Direction::Short),
        _ => None,
    }
}

/// Entry price: an explicit `Entry:` field, else a number followed by a CMP
/// (current market price) marker.
fn extract_entry(upper: &str) -> Option<Decimal> {
    if let Some(at) = find_word(upper, "ENTRY", 0) {
        if let Some((value, _)) = number_after(upper, at + "ENTRY".len(), false) {
            return Some(value);
        }
    }

    // Fallback: "0.2515 (CMP)" style marker. Scan backwards from CMP for
    // the preceding number.
    let cmp_at = find_word(upper, "CMP", 0)?;
    number_before(upper, cmp_at)
}

fn extract_stated_stop_loss(upper: &str) -> Option<Decimal> {
    for key in ["STOP LOSS", "STOPLOSS", "SL"] {
        if let Some(at) = find_word(upper, key, 0) {
            if let Some((value, _)) = number_after(upper, at + key.len(), false) {
                return Some(value);
            }
        }
    }
    None
}

/// Stated take-profit. Tiered signals write `TP 1 → 0.2573`; a leading
/// single-digit integer followed by another number is treated as the tier
/// index and skipped.
fn extract_stated_take_profit(upper: &str) -> Option<Decimal> {
    for key in ["TAKE PROFIT", "TAKEPROFIT", "TP"] {
        if let Some(at) = find_word(upper, key, 0) {
            // A key with no number after it does not rule out a later key.
            let Some((first, end)) = number_after(upper, at + key.len(), true) else {
                continue;
            };
            if first.scale() == 0 && first < dec!(10) {
                if let Some((second, _)) = number_after(upper, end, true) {
                    return Some(second);
                }
            }
            return Some(first);
        }
    }
    None
}

/// Find `key` at a word boundary (neighbouring bytes not alphanumeric),
/// starting the search at `from`.
fn find_word(haystack: &str, key: &str, from: usize) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut search_from = from;
    while let Some(rel) = haystack.get(search_from..)?.find(key) {
        let at = search_from + rel;
        let before_ok = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        let end = at + key.len();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(at);
        }
        search_from = at + 1;
    }
    None
}

/// Parse the first number after byte offset `from`, skipping field
/// separators. With `loose`, arrows/emoji and dashes are also skipped
/// (tiered TP lines). Returns the value and the byte offset just past it.
fn number_after(s: &str, from: usize, loose: bool) -> Option<(Decimal, usize)> {
    let bytes = s.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        let skippable = matches!(b, b':' | b' ' | b'\t' | b'$')
            || (loose && (b == b'-' || b >= 0x80));
        if b.is_ascii_digit() {
            break;
        }
        if !skippable {
            return None;
        }
        i += 1;
    }
    let start = i;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if start == i {
        return None;
    }
    let slice = s[start..i].trim_end_matches('.');
    slice.parse::<Decimal>().ok().map(|d| (d, i))
}

/// Parse the number immediately preceding byte offset `end`, allowing a
/// `(` and spaces in between (the `0.2515 (CMP)` form).
fn number_before(s: &str, end: usize) -> Option<Decimal> {
    let bytes = s.as_bytes();
    let mut i = end;
    while i > 0 && matches!(bytes[i - 1], b' ' | b'\t' | b'(') {
        i -= 1;
    }
    let stop = i;
    while i > 0 && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.') {
        i -= 1;
    }
    if i == stop {
        return None;
    }
    s[i..stop].trim_matches('.').parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_parser() -> SignalParser {
        SignalParser::new(dec!(5), dec!(2.5))
    }

    #[test]
    fn test_parse_full_signal_overrides_stated_levels() {
        let parser = default_parser();
        let signal = parser
            .parse("#BTCUSDT LONG\nEntry: 42000\nTP: 43000\nSL: 41000")
            .unwrap();

        assert_eq!(signal.pair, "BTCUSDT");
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry, dec!(42000));
        // Derived, not the stated 41000/43000.
        assert_eq!(signal.stop_loss, dec!(39900));
        assert_eq!(signal.take_profit, dec!(43050));
        assert_eq!(signal.stated_stop_loss, Some(dec!(41000)));
        assert_eq!(signal.stated_take_profit, Some(dec!(43000)));
    }

    #[test]
    fn test_parse_tiered_message_with_marker_suffix() {
        let parser = default_parser();
        let text = "#METUSDT.P | LONG 🟢\nEntry: 0.2515 (CMP)\nTP 1 → 0.2573\nTP 2 → 0.2580\nStop Loss: 0.25";
        let signal = parser.parse(text).unwrap();

        assert_eq!(signal.pair, "METUSDT");
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry, dec!(0.2515));
        assert_eq!(signal.stated_take_profit, Some(dec!(0.2573)));
        assert_eq!(signal.stated_stop_loss, Some(dec!(0.25)));
    }

    #[test]
    fn test_long_invariant_sl_entry_tp_ordering() {
        let parser = default_parser();
        let signal = parser.parse("#ETHUSDT LONG\nEntry: 2500").unwrap();
        assert!(signal.stop_loss < signal.entry);
        assert!(signal.entry < signal.take_profit);
    }

    #[test]
    fn test_short_invariant_tp_entry_sl_ordering() {
        let parser = default_parser();
        let signal = parser.parse("#ETHUSDT SHORT\nEntry: 2500").unwrap();
        assert!(signal.take_profit < signal.entry);
        assert!(signal.entry < signal.stop_loss);
        assert_eq!(signal.stop_loss, dec!(2625));
        assert_eq!(signal.take_profit, dec!(2437.5));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let parser = default_parser();
        let text = "#SOLUSDT SHORT\nEntry: 145.30";
        assert_eq!(parser.parse(text).unwrap(), parser.parse(text).unwrap());
    }

    #[test]
    fn test_perpetual_marker_stripping_branches() {
        // Bare trailing P that is a marker: stripped once.
        assert_eq!(
            extract_pair("#BTCUSDTP LONG"),
            Some("BTCUSDT".to_string())
        );
        // Dotted marker: stripped.
        assert_eq!(
            extract_pair("#METUSDT.P SHORT"),
            Some("METUSDT".to_string())
        );
        // Symbol legitimately ending without a marker: untouched.
        assert_eq!(extract_pair("#PERPUSDT LONG"), Some("PERPUSDT".to_string()));
        // Quote asset alone is not a pair.
        assert_eq!(extract_pair("USDT only"), None);
    }

    #[test]
    fn test_direction_glyph_fallback() {
        let parser = default_parser();
        let signal = parser.parse("#BTCUSDT 🟢\nEntry: 42000").unwrap();
        assert_eq!(signal.direction, Direction::Long);

        let signal = parser.parse("#BTCUSDT 🔴\nEntry: 42000").unwrap();
        assert_eq!(signal.direction, Direction::Short);

        // Both glyphs, no keyword: ambiguous.
        assert_eq!(
            parser.parse("#BTCUSDT 🟢🔴\nEntry: 42000"),
            Err(ParseError::MissingDirection)
        );
    }

    #[test]
    fn test_keyword_beats_glyph() {
        let parser = default_parser();
        let signal = parser.parse("#BTCUSDT SHORT 🟢\nEntry: 42000").unwrap();
        assert_eq!(signal.direction, Direction::Short);
    }

    #[test]
    fn test_cmp_entry_fallback() {
        let parser = default_parser();
        let signal = parser.parse("#BTCUSDT LONG\n42150.5 (CMP)").unwrap();
        assert_eq!(signal.entry, dec!(42150.5));
    }

    #[test]
    fn test_missing_fields() {
        let parser = default_parser();
        assert_eq!(
            parser.parse("LONG Entry: 42000"),
            Err(ParseError::MissingPair)
        );
        assert_eq!(
            parser.parse("#BTCUSDT Entry: 42000"),
            Err(ParseError::MissingDirection)
        );
        assert_eq!(
            parser.parse("#BTCUSDT LONG to the moon"),
            Err(ParseError::MissingEntry)
        );
    }

    #[test]
    fn test_stated_tp_falls_through_to_later_key() {
        // "Take Profit" with no number must not swallow the real TP line.
        let parser = default_parser();
        let signal = parser
            .parse("#BTCUSDT LONG\nEntry: 42000\nTake Profit coming up\nTP 43000")
            .unwrap();
        assert_eq!(signal.stated_take_profit, Some(dec!(43000)));
    }

    #[test]
    fn test_sl_key_requires_word_boundary() {
        // "SL" inside another token must not be picked up.
        let parser = default_parser();
        let signal = parser.parse("#XSLUSDT LONG\nEntry: 10").unwrap();
        assert_eq!(signal.pair, "XSLUSDT");
        assert_eq!(signal.stated_stop_loss, None);
    }

    #[test]
    fn test_derivation_rounds_to_eight_digits() {
        let parser = SignalParser::new(dec!(5), dec!(2.5));
        let signal = parser.parse("#DOGEUSDT LONG\nEntry: 0.123456789").unwrap();
        assert!(signal.stop_loss.scale() <= 8);
        assert!(signal.take_profit.scale() <= 8);
    }
}
