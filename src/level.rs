use core::fmt;

/// Assurance level.
///
/// This is the discrete trust classification that an
/// [`AssuranceCheck`](crate::AssuranceCheck) assigns to the navigation data it
/// evaluates, and also the level assigned to each individual satellite by the
/// angle-of-arrival check.
///
/// The derived ordering follows the declaration order, so that
/// `Unavailable < Unassured < Inconsistent < Assured`. This ordering does not
/// encode "worst" or "best". Each check defines its own precedence between
/// levels when it classifies.
///
/// # Examples
///
/// ```
/// use pnt_integrity::AssuranceLevel;
///
/// let votes = [AssuranceLevel::Unassured, AssuranceLevel::Inconsistent];
/// assert_eq!(votes.iter().max(), Some(&AssuranceLevel::Inconsistent));
/// assert_eq!(format!("{}", AssuranceLevel::Assured), "Assured");
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub enum AssuranceLevel {
    /// Not enough data to classify.
    #[default]
    Unavailable,
    /// The data appears to be spoofed or jammed.
    Unassured,
    /// The data is suspect, but the evidence is ambiguous.
    Inconsistent,
    /// The data appears genuine.
    Assured,
}

impl AssuranceLevel {
    /// Returns `true` if the level is neither `Assured` nor `Unavailable`.
    pub fn is_suspect(&self) -> bool {
        matches!(self, AssuranceLevel::Unassured | AssuranceLevel::Inconsistent)
    }
}

impl fmt::Display for AssuranceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssuranceLevel::Unavailable => "Unavailable".fmt(f),
            AssuranceLevel::Unassured => "Unassured".fmt(f),
            AssuranceLevel::Inconsistent => "Inconsistent".fmt(f),
            AssuranceLevel::Assured => "Assured".fmt(f),
        }
    }
}
