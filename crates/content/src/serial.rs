//! RFC1982 serial number arithmetic and journal keys.

use std::cmp::Ordering;
use std::fmt;

//----------- Serial ------------------------------------------------------------

/// A 32-bit zone serial number, ordered per RFC1982.
///
/// Serials wrap around; comparison is defined in terms of the signed
/// difference `(b - a) mod 2^32`, not the usual integer order. Two serials
/// whose difference is exactly `2^31` are incomparable under RFC1982 — this
/// implementation treats that case as equal-or-greater in [`Serial::cmp`] so
/// that a total order is still available for use in collections, but
/// [`Serial::partial_cmp_rfc1982`] reports it explicitly as `None`.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Serial(pub u32);

impl Serial {
    /// Construct a serial from a raw `u32`.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The raw value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Add one, wrapping at `2^32`.
    pub const fn add_one(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// RFC1982 ordering between `self` and `other`.
    ///
    /// Returns `None` when the two serials are exactly `2^31` apart, the one
    /// case RFC1982 leaves undefined.
    pub fn partial_cmp_rfc1982(&self, other: &Self) -> Option<Ordering> {
        if self.0 == other.0 {
            return Some(Ordering::Equal);
        }
        let diff = other.0.wrapping_sub(self.0);
        if diff == 0x8000_0000 {
            return None;
        }
        if diff < 0x8000_0000 {
            Some(Ordering::Less)
        } else {
            Some(Ordering::Greater)
        }
    }

    /// Whether `self` is strictly before `other` per RFC1982.
    pub fn precedes(&self, other: &Self) -> bool {
        matches!(self.partial_cmp_rfc1982(other), Some(Ordering::Less))
    }
}

//--- Formatting

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({})", self.0)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

//--- Ordering
//
// A total `Ord` is needed so serials can key a `BTreeMap`/journal index.
// RFC1982 order is only a partial order (see `partial_cmp_rfc1982`); this
// falls back to raw numeric order once `partial_cmp_rfc1982` can't decide,
// which only matters for the vanishingly rare exactly-half-the-space case.
impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Serial {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp_rfc1982(other)
            .unwrap_or_else(|| self.0.cmp(&other.0))
    }
}

//----------- JournalKey ---------------------------------------------------------

/// A journal key packing a `(from, to)` serial pair into 64 bits.
///
/// `pack(from, to) = (to << 32) | from`, matching the on-disk key format so
/// that entries can be ordered and looked up without deserializing their
/// payload.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct JournalKey(pub u64);

impl JournalKey {
    /// Pack a `(from, to)` serial pair into a key.
    pub const fn pack(from: Serial, to: Serial) -> Self {
        Self(((to.0 as u64) << 32) | (from.0 as u64))
    }

    /// Unpack a key back into its `(from, to)` serial pair.
    pub const fn unpack(self) -> (Serial, Serial) {
        (Serial(self.0 as u32), Serial((self.0 >> 32) as u32))
    }

    /// The `from` serial encoded in this key.
    pub const fn from(self) -> Serial {
        self.unpack().0
    }

    /// The `to` serial encoded in this key.
    pub const fn to(self) -> Serial {
        self.unpack().1
    }
}

impl fmt::Debug for JournalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (from, to) = self.unpack();
        write!(f, "JournalKey({from} -> {to})")
    }
}

//----------- SerialPolicy -------------------------------------------------------

/// How a zone's serial number advances when a new instance is built locally.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerialPolicy {
    /// Increment the previous serial by one, wrapping at `2^32`.
    #[default]
    Increment,

    /// Use the number of seconds since the Unix epoch, wrapped to 32 bits.
    UnixTime,
}

impl SerialPolicy {
    /// Compute the next serial given the current one and the current wall
    /// clock (seconds since the Unix epoch).
    ///
    /// If the result does not precede `old` per RFC1982, the caller should
    /// emit a warning (serial regression) but may still proceed; this
    /// function does not itself validate the result against `old` so it
    /// stays a pure function of its inputs.
    pub fn next_serial(self, old: Serial, now_unix_secs: u64) -> Serial {
        match self {
            SerialPolicy::Increment => old.add_one(),
            SerialPolicy::UnixTime => Serial((now_unix_secs & 0xFFFF_FFFF) as u32),
        }
    }
}
