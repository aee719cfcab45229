use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::str::FromStr;

use crate::error::Result;

/// A value that can be recorded as a statistic
pub trait StatisticValue {
    fn to_statistic(&self) -> String;
}
impl StatisticValue for &str {
    fn to_statistic(&self) -> String {
        (*self).to_string()
    }
}
impl StatisticValue for String {
    fn to_statistic(&self) -> String {
        self.clone()
    }
}
impl StatisticValue for i64 {
    fn to_statistic(&self) -> String {
        self.to_string()
    }
}
impl StatisticValue for u64 {
    fn to_statistic(&self) -> String {
        self.to_string()
    }
}
impl StatisticValue for u32 {
    fn to_statistic(&self) -> String {
        self.to_string()
    }
}
impl StatisticValue for f64 {
    fn to_statistic(&self) -> String {
        format_significant(*self)
    }
}

/// Formats a float with three significant digits, switching to scientific notation for very
/// small or large magnitudes (`printf`'s `%.3g`)
fn format_significant(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let scientific = format!("{value:.2e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..3).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            trim_fraction(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        let decimals = (2 - exponent) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Backslash-escapes the characters that would change how a line is parsed back.
///
/// Spaces are escaped everywhere in keys and only in leading position in values.
fn escape(text: &str, key: bool, out: &mut String) {
    for (i, c) in text.chars().enumerate() {
        match c {
            '\\' | '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if key || i == 0 => out.push_str("\\ "),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            c => out.push(c),
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Trims trailing whitespace that is not escaped by a backslash
fn trim_end_unescaped(text: &str) -> &str {
    let mut end = text.len();
    while let Some(c) = text[..end].chars().next_back() {
        if !c.is_whitespace() {
            break;
        }
        let before = &text[..end - c.len_utf8()];
        let backslashes = before.len() - before.trim_end_matches('\\').len();
        if backslashes % 2 == 1 {
            break;
        }
        end = before.len();
    }
    &text[..end]
}

/// Splits a line at its first unescaped `=` or `:`
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], &line[i + 1..]),
            _ => {}
        }
    }
    (line, "")
}

/// Flat key/value statistics stored next to an alignment collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    values: BTreeMap<String, String>,
}
impl Statistics {
    pub fn put<V: StatisticValue>(&mut self, key: &str, value: V) {
        self.values.insert(key.to_string(), value.to_statistic());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parses the value of `key`, returning `None` if absent or unparsable
    #[must_use]
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Writes a comment line followed by one sorted `key=value` line per statistic
    pub fn write_to<W: Write>(&self, writer: &mut W, comment: &str) -> Result<()> {
        writeln!(writer, "#{comment}")?;
        let mut line = String::new();
        for (key, value) in &self.values {
            line.clear();
            escape(key, true, &mut line);
            line.push('=');
            escape(value, false, &mut line);
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut stats = Self::default();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = split_entry(line);
            stats
                .values
                .insert(unescape(trim_end_unescaped(key)), unescape(value.trim_start()));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_significant_digits() {
        assert_eq!(format_significant(0.0), "0");
        assert_eq!(format_significant(1.0), "1");
        assert_eq!(format_significant(3.14159), "3.14");
        assert_eq!(format_significant(12.5), "12.5");
        assert_eq!(format_significant(123.456), "123");
        assert_eq!(format_significant(0.001234), "0.00123");
        assert_eq!(format_significant(1234.5), "1.23e+03");
        assert_eq!(format_significant(0.00001234), "1.23e-05");
        assert_eq!(format_significant(-2.5), "-2.5");
        assert_eq!(format_significant(999.9), "1e+03");
    }

    #[test]
    fn test_escape_roundtrip() {
        let mut escaped = String::new();
        escape("a=b:c\\d\ne", false, &mut escaped);
        assert_eq!(escaped, "a\\=b\\:c\\\\d\\ne");
        assert_eq!(unescape(&escaped), "a=b:c\\d\ne");
    }

    #[test]
    fn test_write_sorted() -> Result<()> {
        let mut stats = Statistics::default();
        stats.put("zeta", 1i64);
        stats.put("alpha", "x");
        stats.put("ratio", 0.5);
        let mut buf = Vec::new();
        stats.write_to(&mut buf, " test statistics")?;
        let text = String::from_utf8(buf)?;
        assert_eq!(text, "# test statistics\nalpha=x\nratio=0.5\nzeta=1\n");
        Ok(())
    }

    #[test]
    fn test_read_back() -> Result<()> {
        let mut stats = Statistics::default();
        stats.put("path", "/data/run:1=final");
        stats.put("number.aligned.reads", 42u64);
        let mut buf = Vec::new();
        stats.write_to(&mut buf, "")?;

        let decoded = Statistics::read_from(Cursor::new(buf))?;
        assert_eq!(decoded, stats);
        assert_eq!(decoded.get_parsed::<u64>("number.aligned.reads"), Some(42));
        assert_eq!(decoded.get_parsed::<u64>("path"), None);
        assert_eq!(decoded.get("missing"), None);
        Ok(())
    }

    #[test]
    fn test_read_foreign_layout() -> Result<()> {
        let text = "! comment\n\n  key : value with spaces\nother=\n";
        let stats = Statistics::read_from(Cursor::new(text))?;
        assert_eq!(stats.get("key"), Some("value with spaces"));
        assert_eq!(stats.get("other"), Some(""));
        assert_eq!(stats.len(), 2);
        Ok(())
    }

    #[test]
    fn test_leading_markers_and_spaces() -> Result<()> {
        let mut stats = Statistics::default();
        stats.put("#hash", "1");
        stats.put("!bang", "2");
        stats.put(" lead", "3");
        stats.put("trail ", "4");
        stats.put("a b", "  padded");
        stats.put("tabs", "\tx#y!z");
        let mut buf = Vec::new();
        stats.write_to(&mut buf, "")?;

        let text = String::from_utf8(buf.clone())?;
        assert!(text.contains("\\#hash=1\n"));
        assert!(text.contains("a\\ b=\\  padded\n"));

        let decoded = Statistics::read_from(Cursor::new(buf))?;
        assert_eq!(decoded, stats);
        assert_eq!(decoded.get("trail "), Some("4"));
        assert_eq!(decoded.get("a b"), Some("  padded"));
        Ok(())
    }

    #[test]
    fn test_trim_end_unescaped() {
        assert_eq!(trim_end_unescaped("key \t "), "key");
        assert_eq!(trim_end_unescaped("key\\ "), "key\\ ");
        assert_eq!(trim_end_unescaped("key\\\\ "), "key\\\\");
        assert_eq!(trim_end_unescaped("   "), "");
    }
}
