use thiserror::Error;

use crate::models::{Direction, TradeSignal};

const MARKER: &str = "strikt";
const QUOTE_TAG: &str = "/usdt";

/// Why a message was not treated as a signal. Ordinary chat traffic lands
/// here constantly, so none of these are errors worth surfacing to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseRejection {
    #[error("signal marker not found")]
    NoMarker,
    #[error("required field not found: {0}")]
    MissingField(&'static str),
    #[error("unreadable number for {0}")]
    BadNumber(&'static str),
    #[error("price for {0} must be positive")]
    NonPositivePrice(&'static str),
    #[error("take-profit ladder not ordered away from entry")]
    BadLadder,
}

/// Scans a raw message for the signal format: the marker token, a base/USDT
/// pair, an emphasised LONG/SHORT, then Entry/TP1/TP2 lines with optional
/// TP3 and SL, in that order. Lines of unrelated text in between are fine.
/// Pure and panic-free on arbitrary input.
pub fn parse_signal(text: &str) -> Result<TradeSignal, ParseRejection> {
    let lines: Vec<&str> = text.lines().collect();
    let marker_line = lines
        .iter()
        .position(|l| find_ci(l, MARKER).is_some())
        .ok_or(ParseRejection::NoMarker)?;
    let marker_end = find_ci(lines[marker_line], MARKER)
        .map(|i| i + MARKER.len())
        .unwrap_or(0);

    let mut sym = None;
    for (i, line) in lines.iter().enumerate().skip(marker_line) {
        let hay = if i == marker_line {
            &lines[marker_line][marker_end..]
        } else {
            *line
        };
        if let Some(pair) = extract_pair(hay) {
            sym = Some((i, pair));
            break;
        }
    }
    let (sym_line, pair) = sym.ok_or(ParseRejection::MissingField("symbol"))?;

    let (dir_line, direction) = lines
        .iter()
        .enumerate()
        .skip(sym_line + 1)
        .find_map(|(i, l)| extract_direction(l).map(|d| (i, d)))
        .ok_or(ParseRejection::MissingField("direction"))?;

    let (entry_line, entry) = find_price(&lines, dir_line + 1, "entry:", "Entry")?
        .ok_or(ParseRejection::MissingField("Entry"))?;
    let (tp1_line, tp1) = find_price(&lines, entry_line + 1, "tp1:", "TP1")?
        .ok_or(ParseRejection::MissingField("TP1"))?;
    let (tp2_line, tp2) = find_price(&lines, tp1_line + 1, "tp2:", "TP2")?
        .ok_or(ParseRejection::MissingField("TP2"))?;

    let tp3_hit = find_price(&lines, tp2_line + 1, "tp3:", "TP3")?;
    let after_tp3 = tp3_hit.map(|(i, _)| i + 1).unwrap_or(tp2_line + 1);
    let tp3 = tp3_hit.map(|(_, v)| v);
    let sl = find_price(&lines, after_tp3, "sl:", "SL")?.map(|(_, v)| v);

    for (label, value) in [
        ("Entry", Some(entry)),
        ("TP1", Some(tp1)),
        ("TP2", Some(tp2)),
        ("TP3", tp3),
        ("SL", sl),
    ] {
        if let Some(v) = value {
            if v <= 0.0 {
                return Err(ParseRejection::NonPositivePrice(label));
            }
        }
    }

    let tp3_eff = tp3.unwrap_or(tp2);
    let ordered = match direction {
        Direction::Long => entry < tp1 && tp1 < tp2 && tp2 <= tp3_eff,
        Direction::Short => entry > tp1 && tp1 > tp2 && tp2 >= tp3_eff,
    };
    if !ordered {
        return Err(ParseRejection::BadLadder);
    }

    Ok(TradeSignal {
        symbol: to_perp(&pair),
        direction,
        entry_price: entry,
        take_profit_1: tp1,
        take_profit_2: tp2,
        take_profit_3: tp3,
        stop_loss: sl,
    })
}

/// Spot-style pair to the perpetual-swap convention, "STX/USDT" ->
/// "STX/USDT:USDT". The settlement currency is fixed.
pub fn to_perp(pair: &str) -> String {
    let base = pair.split('/').next().unwrap_or(pair);
    format!("{base}/USDT:USDT")
}

// --- Field extraction ---

/// Case-insensitive ASCII substring search. Returns a byte index that is
/// always a char boundary because the needle is pure ASCII.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if pat.is_empty() || hay.len() < pat.len() {
        return None;
    }
    (0..=hay.len() - pat.len()).find(|&i| hay[i..i + pat.len()].eq_ignore_ascii_case(pat))
}

/// First "BASE/USDT" pair in the line, uppercased. The base is the maximal
/// alphanumeric run right before the slash.
fn extract_pair(line: &str) -> Option<String> {
    let mut from = 0;
    while let Some(pos) = find_ci(&line[from..], QUOTE_TAG) {
        let at = from + pos;
        let head = &line[..at];
        let base_start = head
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_alphanumeric())
            .last()
            .map(|(i, _)| i);
        if let Some(start) = base_start {
            return Some(format!("{}/USDT", head[start..].to_uppercase()));
        }
        from = at + QUOTE_TAG.len();
    }
    None
}

fn extract_direction(line: &str) -> Option<Direction> {
    if find_ci(line, "*long*").is_some() {
        Some(Direction::Long)
    } else if find_ci(line, "*short*").is_some() {
        Some(Direction::Short)
    } else {
        None
    }
}

/// Looks for `label` from line `from` downward. A found label with an
/// unreadable value is a hard rejection, not a skip: a half-garbled signal
/// must never trade on the readable half.
fn find_price(
    lines: &[&str],
    from: usize,
    pat: &str,
    label: &'static str,
) -> Result<Option<(usize, f64)>, ParseRejection> {
    for (i, line) in lines.iter().enumerate().skip(from) {
        if let Some(at) = find_ci(line, pat) {
            let rest = &line[at + pat.len()..];
            let value = parse_price(rest).ok_or(ParseRejection::BadNumber(label))?;
            return Ok(Some((i, value)));
        }
    }
    Ok(None)
}

/// Unsigned decimal right after the label, tolerating an inline-code
/// backtick around it. No sign, no exponent.
fn parse_price(rest: &str) -> Option<f64> {
    let s = rest.trim_start();
    let s = s.strip_prefix('`').unwrap_or(s);
    let num = leading_decimal(s)?;
    num.parse::<f64>().ok()
}

fn leading_decimal(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == 0 {
        return None;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 {
            end = frac;
        }
    }
    Some(&s[..end])
}
