//! Escaping utilities: a generic bidirectional codec used by the quadlet
//! generator for INI values and environment file values, plus the shell
//! quoting used when a command is rendered for display (logging, dry-run
//! output).

use std::borrow::Cow;

/// One character that must be escaped, and the two-character sequence (a
/// fixed `prefix` plus this `trigger`) that represents it once escaped.
#[derive(Debug, Clone, Copy)]
pub struct EscapePair {
    pub original: char,
    pub trigger: char,
}

/// A bidirectional escape codec: a prefix character plus a list of
/// `(original, trigger)` pairs. `unescape(escape(s)) == s` for every `s`,
/// because escaping only ever inserts `prefix` immediately before a
/// `trigger`, and unescaping only ever consumes exactly one `prefix` before
/// a `trigger` and restores the original character.
pub struct Codec {
    prefix: char,
    pairs: &'static [EscapePair],
}

impl Codec {
    #[must_use]
    pub const fn new(prefix: char, pairs: &'static [EscapePair]) -> Self {
        Self { prefix, pairs }
    }

    fn trigger_for(&self, c: char) -> Option<char> {
        self.pairs
            .iter()
            .find(|pair| pair.original == c)
            .map(|pair| pair.trigger)
    }

    fn original_for(&self, trigger: char) -> Option<char> {
        self.pairs
            .iter()
            .find(|pair| pair.trigger == trigger)
            .map(|pair| pair.original)
    }

    /// Escape every character in `s` that has a registered pair.
    #[must_use]
    pub fn escape(&self, s: &str) -> Cow<str> {
        if !s.chars().any(|c| self.trigger_for(c).is_some()) {
            return Cow::Borrowed(s);
        }

        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match self.trigger_for(c) {
                Some(trigger) => {
                    out.push(self.prefix);
                    out.push(trigger);
                }
                None => out.push(c),
            }
        }
        Cow::Owned(out)
    }

    /// Reverse [`Codec::escape`]. A `prefix` not followed by a known
    /// trigger is passed through unchanged.
    #[must_use]
    pub fn unescape(&self, s: &str) -> Cow<str> {
        if !s.contains(self.prefix) {
            return Cow::Borrowed(s);
        }

        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c == self.prefix {
                if let Some(&next) = chars.peek() {
                    if let Some(original) = self.original_for(next) {
                        out.push(original);
                        chars.next();
                        continue;
                    }
                }
            }
            out.push(c);
        }
        Cow::Owned(out)
    }
}

/// Quoting for INI values: only a literal `"` needs to be escaped.
pub static QUOTE_CODEC: Codec = Codec::new('\\', &[EscapePair { original: '"', trigger: '"' }]);

/// Quoting for environment file values: backslash, double quote, `$`,
/// backtick, and newline.
pub static ENV_CODEC: Codec = Codec::new(
    '\\',
    &[
        EscapePair { original: '\\', trigger: '\\' },
        EscapePair { original: '"', trigger: '"' },
        EscapePair { original: '$', trigger: '$' },
        EscapePair { original: '`', trigger: '`' },
        EscapePair { original: '\n', trigger: 'n' },
    ],
);

/// Join an iterator of command arguments into a [`String`], [quoting](arg_quote()) when
/// necessary. Used only to render a command for display (logs, dry-run output); actual
/// process invocation always passes arguments as a `Vec<String>`, never through a shell.
pub(crate) fn command_join<I>(args: I) -> String
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut args = args.into_iter();

    let (lower, upper) = args.size_hint();
    let mut string = String::with_capacity(upper.unwrap_or(lower) * 2);

    if let Some(first) = args.next() {
        string.push_str(&arg_quote(first.as_ref()));
    }

    for arg in args {
        string.push(' ');
        string.push_str(&arg_quote(arg.as_ref()));
    }

    string
}

/// Encode a string for use as a shell argument.
///
/// ASCII control characters that are not whitespace are silently removed.
pub(crate) fn arg_quote(arg: &str) -> Cow<str> {
    if arg.contains(char_is_ascii_control_not_whitespace) {
        let arg = arg.replace(char_is_ascii_control_not_whitespace, "");
        shlex::try_quote(&arg)
            .expect("null characters have been removed")
            .into_owned()
            .into()
    } else {
        shlex::try_quote(arg).expect("string does not contain null character")
    }
}

/// Checks if the character is an ASCII control character and is not an ASCII whitespace character.
fn char_is_ascii_control_not_whitespace(char: char) -> bool {
    // Do not match on "Horizontal Tab" (\t, \x09), "Line Feed" (\n, \x0A), "Vertical Tab" (\x0B),
    // "Form Feed" (\x0C), or "Carriage Return" (\r, \x0D).
    char.is_ascii_control() && !matches!(char, '\x09'..='\x0D')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_codec_round_trips_arbitrary_strings() {
        for s in ["no quotes here", "has \"one\" quote", "\"\"\"", ""] {
            assert_eq!(QUOTE_CODEC.unescape(&QUOTE_CODEC.escape(s)), s);
        }
    }

    #[test]
    fn env_codec_round_trips_arbitrary_strings() {
        for s in [
            "plain",
            "has $VAR and `cmd` and \"quote\" and \\slash",
            "multi\nline",
        ] {
            assert_eq!(ENV_CODEC.unescape(&ENV_CODEC.escape(s)), s);
        }
    }

    #[test]
    fn env_codec_escapes_dollar_sign() {
        assert_eq!(ENV_CODEC.escape("$HOME"), "\\$HOME");
    }

    #[test]
    fn quote_remove_control() {
        assert_eq!(arg_quote("te\0st"), "test");
        assert_eq!(arg_quote("hello\nworld"), "'hello\nworld'");
    }

    #[test]
    fn join() {
        assert_eq!(command_join(["test", "hello world"]), "test 'hello world'");
    }
}
