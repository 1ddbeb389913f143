use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// An offset in whole seconds, written as `HH:MM:SS` by the vendors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timecode(u64);

impl Timecode {
    pub const ZERO: Timecode = Timecode(0);

    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64
    }

    /// Shift by a signed number of seconds, clamping at zero
    pub fn shift(self, secs: i64) -> Self {
        Self(self.0.saturating_add_signed(secs))
    }

    /// The offset of `self` relative to `origin`, clamping at zero
    pub fn relative_to(self, origin: Timecode) -> Self {
        Self(self.0.saturating_sub(origin.0))
    }
}

impl FromStr for Timecode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty timecode".to_owned());
        }

        let mut secs = 0u64;
        let mut parts = 0;
        for part in s.split(':') {
            let n: u64 = part
                .parse()
                .map_err(|_| format!("invalid timecode component '{part}' in '{s}'"))?;
            if parts > 0 && n >= 60 {
                return Err(format!("timecode component '{part}' out of range in '{s}'"));
            }
            secs = 60 * secs + n;
            parts += 1;
        }

        if parts > 3 {
            return Err(format!("too many components in timecode '{s}'"));
        }
        Ok(Self(secs))
    }
}

impl Display for Timecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let h = self.0 / 3600;
        let m = (self.0 % 3600) / 60;
        let s = self.0 % 60;
        write!(f, "{h:02}:{m:02}:{s:02}")
    }
}

impl Serialize for Timecode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timecode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let tc: Timecode = "01:02:03".parse().unwrap();
        assert_eq!(tc.as_secs(), 3723);
        assert_eq!(tc.to_string(), "01:02:03");

        let short: Timecode = "4:05".parse().unwrap();
        assert_eq!(short.as_secs(), 245);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Timecode>().is_err());
        assert!("aa:bb".parse::<Timecode>().is_err());
        assert!("41:09:00".parse::<Timecode>().is_ok());
        assert!("00:61:00".parse::<Timecode>().is_err());
        assert!("1:00:00:00".parse::<Timecode>().is_err());
    }

    #[test]
    fn shift_clamps_at_zero() {
        let tc = Timecode::from_secs(1);
        assert_eq!(tc.shift(-2), Timecode::ZERO);
        assert_eq!(tc.shift(2).as_secs(), 3);
        assert_eq!(
            Timecode::from_secs(90).relative_to(Timecode::from_secs(30)),
            Timecode::from_secs(60)
        );
    }
}
