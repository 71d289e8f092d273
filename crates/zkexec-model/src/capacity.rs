use std::fmt;

use crate::error::CapacityError;

/// Maximum number of concurrently admitted instances.
///
/// Parsed from the first line of the control node data. Zero or a negative
/// value is valid and admits nobody until it is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capacity(i64);

impl Capacity {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Parse the raw data of the control node at `path`.
    ///
    /// Only the first line counts; `\n` and `\r\n` terminators are stripped,
    /// any other whitespace makes the value invalid.
    pub fn parse(path: &str, data: &[u8]) -> Result<Self, CapacityError> {
        let text = std::str::from_utf8(data).map_err(|e| CapacityError::Invalid {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let line = match text.lines().next() {
            Some(line) => line,
            None => return Err(CapacityError::Empty(path.to_string())),
        };

        line.parse::<i64>()
            .map(Self)
            .map_err(|e| CapacityError::Invalid {
                path: path.to_string(),
                reason: format!("{e}: {line:?}"),
            })
    }

    /// Returns `true` if `running` reservations still leave room for one more.
    #[inline]
    pub fn admits(self, running: usize) -> bool {
        i64::try_from(running).is_ok_and(|running| running < self.0)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
