//! Flags carried by requests and replies.

use std::fmt;
use std::ops::BitOr;

/// The individual flags understood by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FlagTable)]
pub enum Flag {
    /// At least one more reply is queued and will be delivered immediately after this one.
    ///
    /// Applications should wait for a reply without this flag before updating their UI or
    /// state. A cleared flag does not mean no more replies will ever arrive, only that none are
    /// available right now.
    #[flag(bit = 0x1)]
    MoreComing,
    /// Set on browse and domain enumeration replies when the result was added; cleared when it
    /// was removed.
    #[flag(bit = 0x2)]
    Add,
    /// Marks the default domain during domain enumeration. Only valid together with `Add`.
    #[flag(bit = 0x4)]
    Default,
    /// Report a name conflict instead of renaming the service automatically.
    #[flag(bit = 0x8)]
    NoAutoRename,
    /// The record may exist under the same name on several hosts (e.g. PTR records).
    #[flag(bit = 0x10)]
    Shared,
    /// The record name must be unique on the network (e.g. SRV records).
    #[flag(bit = 0x20)]
    Unique,
    /// Enumerate domains recommended for browsing.
    #[flag(bit = 0x40)]
    BrowseDomains,
    /// Enumerate domains recommended for registration.
    #[flag(bit = 0x80)]
    RegistrationDomains,
    /// Create a long-lived unicast query.
    #[flag(bit = 0x100)]
    LongLivedQuery,
}

/// An immutable set of [`Flag`]s.
///
/// Bits outside the known flags are preserved by [`Flags::bits()`] but ignored everywhere else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Flags(u32);

impl Flags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, flag: Flag) -> bool {
        self.0 & flag.bits() != 0
    }

    /// Returns a copy of this set with `flag` added.
    pub const fn with(self, flag: Flag) -> Self {
        Self(self.0 | flag.bits())
    }

    /// Returns a copy of this set with `flag` removed.
    pub const fn without(self, flag: Flag) -> Self {
        Self(self.0 & !flag.bits())
    }

    /// Returns true if further replies are ready for immediate delivery.
    pub const fn more_coming(self) -> bool {
        self.contains(Flag::MoreComing)
    }

    /// Returns true if the reply reports an addition rather than a removal.
    pub const fn is_add(self) -> bool {
        self.contains(Flag::Add)
    }

    pub const fn is_default(self) -> bool {
        self.contains(Flag::Default)
    }

    /// Returns the known flags in this set, in bit order.
    pub fn iter(self) -> impl Iterator<Item = Flag> {
        Flag::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    /// Builds a set from flag names as listed in [`Flag::TABLE`]. Returns `None` for an unknown
    /// name.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        names
            .into_iter()
            .try_fold(Self::empty(), |flags, name| Flag::from_name(name).map(|f| flags.with(f)))
    }
}

impl From<Flag> for Flags {
    fn from(flag: Flag) -> Self {
        Self(flag.bits())
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<Flag> for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flag) -> Flags {
        self.with(rhs)
    }
}

impl BitOr for Flag {
    type Output = Flags;

    fn bitor(self, rhs: Flag) -> Flags {
        Flags::from(self).with(rhs)
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter().map(Flag::name).collect::<Vec<_>>();
        f.write_str(&names.join(","))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
