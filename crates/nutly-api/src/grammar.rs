//! Response line grammar.
//!
//! upsd replies are whitespace-separated words, where the last word of a
//! value line is usually a double-quoted string with `\"` and `\\` escapes:
//!
//! ```text
//! VAR ups battery.charge "87"
//! UPS ups "Eaton 5E"
//! CMD ups beeper.enable
//! NUMLOGINS ups 1
//! TYPE ups input.transfer.low RW ENUM
//! ```
//!
//! Parsing is deliberately forgiving: a line that does not fit the shape a
//! caller asked for is skipped, never an error.
//!
//! Edge cases:
//! - A value without quotes is accepted as-is (`NUMLOGINS ups 1`).
//! - A map line without a value (`VAR ups battery.charge`) is skipped.
//! - A line with an unterminated quote is skipped.
//! - An empty quoted value (`""`) yields an empty string, not a skip.

use std::collections::BTreeMap;

/// One word of a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub quoted: bool,
}

/// Split a line into words, honouring double quotes and backslash escapes.
///
/// Returns `None` for an unterminated quote or a dangling escape.
pub fn split_words(line: &str) -> Option<Vec<Word>> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            return Some(words);
        };

        if first == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next()? {
                    '"' => break,
                    '\\' => text.push(chars.next()?),
                    c => text.push(c),
                }
            }
            words.push(Word { text, quoted: true });
        } else {
            let mut text = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                text.push(c);
            }
            words.push(Word {
                text,
                quoted: false,
            });
        }
    }
}

/// Quote a value for `SET VAR`, escaping `\` and `"`.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Strip the leading unquoted `key` words from `words`.
fn strip_key<'a>(words: &'a [Word], key: &[&str]) -> Option<&'a [Word]> {
    if words.len() < key.len() {
        return None;
    }
    let (head, rest) = words.split_at(key.len());
    head.iter()
        .zip(key)
        .all(|(word, expected)| !word.quoted && word.text == *expected)
        .then_some(rest)
}

fn key_words(key: &str) -> Vec<&str> {
    key.split_whitespace().collect()
}

/// Extract the value from a single-value reply to `GET <prefix>`.
///
/// Matches the first line of `body` of the form `<prefix> "value"` (quotes
/// optional) and returns the trimmed value. Unquoted multi-word remainders
/// (e.g. `TYPE` replies) are returned joined by single spaces.
pub fn parse_value(body: &str, prefix: &str) -> Option<String> {
    let key = key_words(prefix);
    body.lines().find_map(|line| {
        let words = split_words(line)?;
        let rest = strip_key(&words, &key)?;
        match rest {
            [] => None,
            [single] => Some(single.text.trim().to_owned()),
            many => Some(
                many.iter()
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_owned(),
            ),
        }
    })
}

/// Collect the tokens of every `<key> <token>` line, in arrival order.
pub fn parse_list(body: &str, key: &str) -> Vec<String> {
    let key = key_words(key);
    body.lines()
        .filter_map(|line| {
            let words = split_words(line)?;
            match strip_key(&words, &key)? {
                [token] if !token.quoted => Some(token.text.clone()),
                _ => None,
            }
        })
        .collect()
}

/// Collect every `<key> <token> "value"` line into a map.
///
/// Keys are unique; a repeated token keeps the last value seen.
pub fn parse_map(body: &str, key: &str) -> BTreeMap<String, String> {
    let key = key_words(key);
    let mut map = BTreeMap::new();
    for line in body.lines() {
        let Some(words) = split_words(line) else {
            continue;
        };
        if let Some([token, value]) = strip_key(&words, &key) {
            if !token.quoted {
                map.insert(token.text.clone(), value.text.clone());
            }
        }
    }
    map
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const VAR_LIST: &str = "BEGIN LIST VAR ups\n\
        VAR ups battery.charge \"87\"\n\
        VAR ups device.mfr \"EATON\"\n\
        VAR ups ups.status \"OL CHRG\"\n\
        VAR ups broken \"unterminated\n\
        VAR ups nodata\n\
        END LIST VAR ups";

    #[test]
    fn split_words_handles_quotes_and_escapes() {
        let words = split_words(r#"VAR ups ups.mfr "APC \"Smart\" \\ UPS""#).unwrap();
        let texts: Vec<_> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["VAR", "ups", "ups.mfr", r#"APC "Smart" \ UPS"#]);
        assert!(words[3].quoted);
        assert!(!words[0].quoted);
    }

    #[test]
    fn split_words_rejects_unterminated_quote() {
        assert_eq!(split_words(r#"VAR ups x "abc"#), None);
        assert_eq!(split_words(r#"VAR ups x "abc\"#), None);
    }

    #[test]
    fn split_words_keeps_empty_quoted_value() {
        let words = split_words(r#"VAR ups device.serial """#).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[3].text, "");
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("30"), "\"30\"");
        assert_eq!(quote(r#"a "b" \c"#), r#""a \"b\" \\c""#);
    }

    #[test]
    fn parse_value_quoted_and_bare() {
        assert_eq!(
            parse_value("VAR ups battery.charge \"87\"", "VAR ups battery.charge").as_deref(),
            Some("87")
        );
        assert_eq!(
            parse_value("NUMLOGINS ups 2", "NUMLOGINS ups").as_deref(),
            Some("2")
        );
        assert_eq!(
            parse_value("TYPE ups input.transfer.low RW ENUM", "TYPE ups input.transfer.low")
                .as_deref(),
            Some("RW ENUM")
        );
        assert_eq!(
            parse_value("UPSDESC ups \"  Rack UPS \"", "UPSDESC ups").as_deref(),
            Some("Rack UPS")
        );
    }

    #[test]
    fn parse_value_requires_word_boundary_and_value() {
        assert_eq!(
            parse_value(
                "VAR ups battery.charge.low \"20\"",
                "VAR ups battery.charge"
            ),
            None
        );
        assert_eq!(parse_value("VAR ups battery.charge", "VAR ups battery.charge"), None);
        assert_eq!(parse_value("ERR VAR-NOT-SUPPORTED", "VAR ups x"), None);
    }

    #[test]
    fn parse_list_keeps_order_and_skips_noise() {
        let body = "BEGIN LIST CMD ups\n\
            CMD ups test.battery.start\n\
            CMD ups beeper.enable\n\
            CMD other beeper.disable\n\
            CMD ups \"quoted\"\n\
            CMD ups two words\n\
            CMD ups load.off\n\
            END LIST CMD ups";
        assert_eq!(
            parse_list(body, "CMD ups"),
            vec!["test.battery.start", "beeper.enable", "load.off"]
        );
    }

    #[test]
    fn parse_map_skips_malformed_lines() {
        let map = parse_map(VAR_LIST, "VAR ups");
        assert_eq!(map.len(), 3);
        assert_eq!(map["battery.charge"], "87");
        assert_eq!(map["ups.status"], "OL CHRG");
        assert!(!map.contains_key("broken"));
        assert!(!map.contains_key("nodata"));
    }

    #[test]
    fn parse_map_last_write_wins() {
        let body = "UPS a \"one\"\nUPS b \"two\"\nUPS a \"three\"\nEND LIST UPS";
        let map = parse_map(body, "UPS");
        assert_eq!(map["a"], "three");
        assert_eq!(map["b"], "two");
    }

    #[test]
    fn parse_map_accepts_unquoted_value() {
        let map = parse_map("RW ups battery.charge.low 20\n", "RW ups");
        assert_eq!(map["battery.charge.low"], "20");
    }

    #[test]
    fn reparsing_is_idempotent() {
        let first = parse_map(VAR_LIST, "VAR ups");
        let second = parse_map(VAR_LIST, "VAR ups");
        assert_eq!(first, second);

        let body = "CLIENT ups 10.0.0.2\nCLIENT ups 10.0.0.1\nEND LIST CLIENT ups";
        assert_eq!(parse_list(body, "CLIENT ups"), parse_list(body, "CLIENT ups"));
    }
}
