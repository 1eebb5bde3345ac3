//! Pitch shift value object.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Pitch shift in semitones, within [`PitchShift::MIN`, `PitchShift::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PitchShift(i32);

impl PitchShift {
    pub const MIN: i32 = -24;
    pub const MAX: i32 = 24;

    pub fn new(semitones: i32) -> Result<Self, Error> {
        if !(Self::MIN..=Self::MAX).contains(&semitones) {
            return Err(Error::validation(format!(
                "pitch_shift must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                semitones
            )));
        }
        Ok(Self(semitones))
    }

    pub fn semitones(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for PitchShift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert_eq!(PitchShift::new(-24).unwrap().semitones(), -24);
        assert_eq!(PitchShift::new(24).unwrap().semitones(), 24);
        assert_eq!(PitchShift::default().semitones(), 0);
        assert!(matches!(PitchShift::new(25), Err(Error::Validation(_))));
        assert!(PitchShift::new(-25).is_err());
    }
}
