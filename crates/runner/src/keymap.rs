//! Character to QEMU qcode mapping for a US keyboard layout

const LETTERS: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r",
    "s", "t", "u", "v", "w", "x", "y", "z",
];

const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

/// A key, optionally held together with shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub qcode: &'static str,
    pub shift: bool,
}

impl KeyChord {
    const fn plain(qcode: &'static str) -> Self {
        Self { qcode, shift: false }
    }

    const fn shifted(qcode: &'static str) -> Self {
        Self { qcode, shift: true }
    }
}

/// Chord that types `c`, if there is one
pub fn chord_for(c: char) -> Option<KeyChord> {
    if c.is_ascii_lowercase() {
        return Some(KeyChord::plain(LETTERS[(c as u8 - b'a') as usize]));
    }
    if c.is_ascii_uppercase() {
        return Some(KeyChord::shifted(LETTERS[(c as u8 - b'A') as usize]));
    }
    if c.is_ascii_digit() {
        return Some(KeyChord::plain(DIGITS[(c as u8 - b'0') as usize]));
    }

    let chord = match c {
        ' ' => KeyChord::plain("spc"),
        '\n' => KeyChord::plain("ret"),
        '\t' => KeyChord::plain("tab"),
        '-' => KeyChord::plain("minus"),
        '=' => KeyChord::plain("equal"),
        '[' => KeyChord::plain("bracket_left"),
        ']' => KeyChord::plain("bracket_right"),
        ';' => KeyChord::plain("semicolon"),
        '\'' => KeyChord::plain("apostrophe"),
        '`' => KeyChord::plain("grave_accent"),
        '\\' => KeyChord::plain("backslash"),
        ',' => KeyChord::plain("comma"),
        '.' => KeyChord::plain("dot"),
        '/' => KeyChord::plain("slash"),
        '_' => KeyChord::shifted("minus"),
        '+' => KeyChord::shifted("equal"),
        '{' => KeyChord::shifted("bracket_left"),
        '}' => KeyChord::shifted("bracket_right"),
        ':' => KeyChord::shifted("semicolon"),
        '"' => KeyChord::shifted("apostrophe"),
        '~' => KeyChord::shifted("grave_accent"),
        '|' => KeyChord::shifted("backslash"),
        '<' => KeyChord::shifted("comma"),
        '>' => KeyChord::shifted("dot"),
        '?' => KeyChord::shifted("slash"),
        '!' => KeyChord::shifted("1"),
        '@' => KeyChord::shifted("2"),
        '#' => KeyChord::shifted("3"),
        '$' => KeyChord::shifted("4"),
        '%' => KeyChord::shifted("5"),
        '^' => KeyChord::shifted("6"),
        '&' => KeyChord::shifted("7"),
        '*' => KeyChord::shifted("8"),
        '(' => KeyChord::shifted("9"),
        ')' => KeyChord::shifted("0"),
        _ => return None,
    };
    Some(chord)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits() {
        assert_eq!(chord_for('q'), Some(KeyChord::plain("q")));
        assert_eq!(chord_for('Q'), Some(KeyChord::shifted("q")));
        assert_eq!(chord_for('7'), Some(KeyChord::plain("7")));
    }

    #[test]
    fn test_symbols() {
        assert_eq!(chord_for(' '), Some(KeyChord::plain("spc")));
        assert_eq!(chord_for('\n'), Some(KeyChord::plain("ret")));
        assert_eq!(chord_for('|'), Some(KeyChord::shifted("backslash")));
        assert_eq!(chord_for('/'), Some(KeyChord::plain("slash")));
    }

    #[test]
    fn test_unmapped() {
        assert_eq!(chord_for('é'), None);
        assert_eq!(chord_for('\u{1b}'), None);
    }
}
