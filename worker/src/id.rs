use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::Error;

/// Prefix carried by the textual form of every job id.
const PREFIX: &str = "job";

/// Opaque, globally unique job identifier.
///
/// The textual form is `job_<32 hex digits>` and round-trips through
/// [`fmt::Display`] and [`FromStr`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh id from the system randomness source.
    pub fn new() -> Result<Self, Error> {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).map_err(|_| Error::IdGeneration)?;
        Ok(Self(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", PREFIX, self.0.simple())
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let suffix = s
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or(Error::InvalidJobId)?;
        let uuid = Uuid::try_parse(suffix).map_err(|_| Error::InvalidJobId)?;
        Ok(Self(uuid))
    }
}
