use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;
use crate::keypad::{KEY_COUNT, SENSE_LINES, STROBE_LINES};

/// Represents the keys on a 3x4 telephone keypad.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum KeypadKey {
    /// The `1` key.
    Key1,
    /// The `2` key.
    Key2,
    /// The `3` key.
    Key3,
    /// The `4` key.
    Key4,
    /// The `5` key.
    Key5,
    /// The `6` key.
    Key6,
    /// The `7` key.
    Key7,
    /// The `8` key.
    Key8,
    /// The `9` key.
    Key9,
    /// The `0` key.
    Key0,
    /// The `*` key.
    KeyAsterisk,
    /// The `#` key.
    KeyHash,
}

impl KeypadKey {
    /// Converts the [KeypadKey] to its corresponding character.
    pub fn to_char(self) -> char {
        use KeypadKey::*;

        match self {
            Key1 => '1',
            Key2 => '2',
            Key3 => '3',
            Key4 => '4',
            Key5 => '5',
            Key6 => '6',
            Key7 => '7',
            Key8 => '8',
            Key9 => '9',
            Key0 => '0',
            KeyAsterisk => '*',
            KeyHash => '#',
        }
    }

    /// Gets the Linux input event code reported for this key.
    ///
    /// `#` has no keypad code of its own and is reported as `KEY_KPENTER`.
    pub fn input_code(self) -> u16 {
        use KeypadKey::*;

        match self {
            Key7 => 71,
            Key8 => 72,
            Key9 => 73,
            Key4 => 75,
            Key5 => 76,
            Key6 => 77,
            Key1 => 79,
            Key2 => 80,
            Key3 => 81,
            Key0 => 82,
            KeyAsterisk => 55,
            KeyHash => 96,
        }
    }
}

impl Display for KeypadKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum KeymapError {
    #[error("key {key} is mapped to both {first:?} and {second:?}")]
    Duplicate {
        key: KeypadKey,
        first: (usize, usize),
        second: (usize, usize),
    },
}

/// Maps matrix cells `(row, column)` to keys.
///
/// Rows are sense lines, columns are strobe lines. Cell `(row, column)` lives at index
/// `row * STROBE_LINES + column`.
#[derive(Clone, Eq, PartialEq)]
pub struct Keymap {
    keys: [KeypadKey; KEY_COUNT],
}

impl Keymap {
    /// Creates a keymap from a row-major table.
    ///
    /// # Errors
    /// - `KeymapError::Duplicate` if a key appears in more than one cell.
    pub fn new(keys: [KeypadKey; KEY_COUNT]) -> Result<Self, KeymapError> {
        for (second, key) in keys.iter().enumerate() {
            if let Some(first) = keys[..second].iter().position(|other| other == key) {
                return Err(KeymapError::Duplicate {
                    key: *key,
                    first: Self::position(first),
                    second: Self::position(second),
                });
            }
        }
        Ok(Keymap { keys })
    }

    /// Gets the table index of the cell at `(row, column)`.
    pub const fn index(row: usize, column: usize) -> usize {
        row * STROBE_LINES + column
    }

    /// Gets the cell `(row, column)` at the given table index.
    pub const fn position(index: usize) -> (usize, usize) {
        (index / STROBE_LINES, index % STROBE_LINES)
    }

    /// Gets the key at `(row, column)`, if the cell exists.
    pub fn get(&self, row: usize, column: usize) -> Option<KeypadKey> {
        if row < SENSE_LINES && column < STROBE_LINES {
            Some(self.keys[Self::index(row, column)])
        } else {
            None
        }
    }

    /// All keys, in table order.
    pub fn keys(&self) -> &[KeypadKey] {
        &self.keys
    }

    /// Finds the cell a key is mapped to.
    pub fn find(&self, key: KeypadKey) -> Option<(usize, usize)> {
        self.keys.iter().position(|&k| k == key).map(Self::position)
    }
}

impl Default for Keymap {
    fn default() -> Self {
        use KeypadKey::*;

        Keymap {
            keys: [
                Key1, Key2, Key3,
                Key4, Key5, Key6,
                Key7, Key8, Key9,
                KeyAsterisk, Key0, KeyHash,
            ],
        }
    }
}

impl Debug for Keymap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let chars: String = self.keys.iter().map(|key| key.to_char()).collect();
        write!(f, "Keymap({})", chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use KeypadKey::*;

    #[test]
    fn default_layout_is_a_phone_pad() {
        let keymap = Keymap::default();
        assert_eq!(keymap.get(0, 0), Some(Key1));
        assert_eq!(keymap.get(1, 2), Some(Key6));
        assert_eq!(keymap.get(3, 0), Some(KeyAsterisk));
        assert_eq!(keymap.get(3, 1), Some(Key0));
        assert_eq!(keymap.get(3, 2), Some(KeyHash));
        assert_eq!(keymap.get(4, 0), None);
        assert_eq!(keymap.get(0, 3), None);
        assert_eq!(format!("{:?}", keymap), "Keymap(123456789*0#)");
    }

    #[test]
    fn default_layout_has_no_duplicates() {
        let keymap = Keymap::default();
        assert!(Keymap::new(keymap.keys().try_into().unwrap()).is_ok());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut keys = [
            Key1, Key2, Key3, Key4, Key5, Key6, Key7, Key8, Key9, KeyAsterisk, Key0, KeyHash,
        ];
        keys[7] = Key2;
        assert_eq!(
            Keymap::new(keys),
            Err(KeymapError::Duplicate { key: Key2, first: (0, 1), second: (2, 1) }),
        );
    }

    #[test]
    fn index_and_position_agree() {
        for index in 0..KEY_COUNT {
            let (row, column) = Keymap::position(index);
            assert_eq!(Keymap::index(row, column), index);
        }
        assert_eq!(Keymap::default().find(Key0), Some((3, 1)));
    }

    #[test]
    fn input_codes_are_distinct() {
        let keymap = Keymap::default();
        let mut codes: Vec<u16> = keymap.keys().iter().map(|key| key.input_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), KEY_COUNT);
        assert_eq!(Key1.input_code(), 79);
        assert_eq!(KeyHash.input_code(), 96);
    }
}
