use std::fmt::{self, Display};
use std::sync::OnceLock;

use regex_lite::{Regex, RegexBuilder};
use serde::de::{Unexpected, Visitor};
use serde::{Deserialize, Deserializer};

/// A duration in config files: either integer seconds or a string like `1h 30m` or `500ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub fn from_secs(seconds: u64) -> Self {
        Self(std::time::Duration::from_secs(seconds))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    fn parse(s: &str) -> Option<Result<Self, String>> {
        static REGEXP: OnceLock<Regex> = OnceLock::new();

        let regexp = REGEXP.get_or_init(|| {
            RegexBuilder::new(
                r"
                ^ \s*
                (?:(?<d>  \d+) d  \s*)?
                (?:(?<h>  \d+) h  \s*)?
                (?:(?<m>  \d+) m  \s*)?
                (?:(?<s>  \d+) s  \s*)?
                (?:(?<ms> \d+) ms \s*)?
                $",
            )
            .ignore_whitespace(true)
            .build()
            .expect("the duration regex is valid")
        });
        let captures = regexp.captures(s)?;

        const UNITS: [(&str, u64); 5] = [
            ("d", 86_400_000),
            ("h", 3_600_000),
            ("m", 60_000),
            ("s", 1_000),
            ("ms", 1),
        ];

        let mut millis = 0u64;
        let mut matched = false;

        for (unit, scale) in UNITS {
            let Some(m) = captures.name(unit) else {
                continue;
            };
            matched = true;

            let total = m
                .as_str()
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(scale))
                .and_then(|n| n.checked_add(millis));

            match total {
                Some(total) => millis = total,
                None => return Some(Err(format!("duration `{s}` is too large"))),
            }
        }

        matched.then(|| Ok(Self(std::time::Duration::from_millis(millis))))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a duration")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_u64(v.try_into().map_err(E::custom)?)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match Duration::parse(v) {
                    Some(result) => result.map_err(E::custom),
                    None => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_str(DurationVisitor)
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}
