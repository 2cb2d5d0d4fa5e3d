//! Piecewise-constant functions over integer positions.
//!
//! A [`PiecewiseIndex`] stores a function from positions to values as a sorted
//! list of disjoint half-open intervals, each bound to one value. It is used to
//! keep per-target annotations (e.g. effective lengths) compact when long runs
//! of targets share the same value.
//!
//! # Binary format
//!
//! The raw layout written by [`PiecewiseIndex::write_to`] is
//! `count: u64` followed by `count` records of `lower: u64, upper: u64,
//! value`, all little-endian, without padding. The value width depends on the
//! payload type (see [`PiecewiseValue`]).
//!
//! [`PiecewiseIndex::write_versioned`] prefixes the raw layout with a header
//! carrying a magic, the format version, the payload type tag and width, the
//! body length, and a CRC-32 of the body; all of which are checked on read.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::io::{Cursor, Read, Write};
use std::ops::Range;

use binrw::{binrw, BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 8 + 1 + 1 + 1 + 8 + 4;
// Upper bound of the preallocation made before any record has been read
const MAX_INITIAL_CAPACITY: usize = 64 * 1024;

/// Error occurring when querying, building or (de)serializing a
/// [`PiecewiseIndex`].
#[derive(Debug)]
pub enum PiecewiseError {
    /// The index has no intervals.
    EmptyIndex,
    /// No interval covers the position.
    OutOfDomain(u64),
    /// The interval is empty or inverted.
    InvalidInterval(u64, u64),
    /// The interval overlaps an interval already stored.
    Overlap {
        new: Range<u64>,
        existing: Range<u64>,
    },
    /// The stream ended before the structure was fully read.
    Truncated,
    /// The stream has been read, but does not describe a valid index.
    Malformed(String),
    /// Unsupported format version.
    InvalidVersion(u8),
    /// The stream stores values of another type than requested.
    ValueTypeMismatch {
        expected: (u8, u8),
        actual: (u8, u8),
    },
    /// The CRC-32 of the body does not match the one in the header.
    ChecksumMismatch(u32, u32),
    IoError(io::Error),
    SerializeError(binrw::Error),
}

impl PiecewiseError {
    fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::Malformed(reason.into())
    }
}

impl From<io::Error> for PiecewiseError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::IoError(e)
        }
    }
}

impl From<binrw::Error> for PiecewiseError {
    fn from(e: binrw::Error) -> Self {
        match e {
            binrw::Error::Io(e) => e.into(),
            e => Self::SerializeError(e),
        }
    }
}

impl Display for PiecewiseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PiecewiseError::EmptyIndex => write!(f, "The index is empty"),
            PiecewiseError::OutOfDomain(position) => {
                write!(f, "Position {} is not covered by any interval", position)
            }
            PiecewiseError::InvalidInterval(lower, upper) => {
                write!(f, "Invalid interval [{}, {})", lower, upper)
            }
            PiecewiseError::Overlap { new, existing } => write!(
                f,
                "Interval [{}, {}) overlaps existing interval [{}, {})",
                new.start, new.end, existing.start, existing.end
            ),
            PiecewiseError::Truncated => write!(f, "Unexpected end of data"),
            PiecewiseError::Malformed(reason) => write!(f, "Malformed index: {}", reason),
            PiecewiseError::InvalidVersion(version) => {
                write!(f, "Invalid index format version: {}", version)
            }
            PiecewiseError::ValueTypeMismatch { expected, actual } => write!(
                f,
                "Value type mismatch (expected tag {} width {}, found tag {} width {})",
                expected.0, expected.1, actual.0, actual.1
            ),
            PiecewiseError::ChecksumMismatch(actual, expected) => write!(
                f,
                "Invalid index checksum (actual: {:08X}, expected: {:08X})",
                actual, expected
            ),
            PiecewiseError::IoError(e) => write!(f, "IO error: {}", e),
            PiecewiseError::SerializeError(e) => write!(f, "Serialize error: {}", e),
        }
    }
}

impl Error for PiecewiseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PiecewiseError::IoError(e) => Some(e),
            PiecewiseError::SerializeError(e) => Some(e),
            _ => None,
        }
    }
}

pub type PiecewiseResult<T> = Result<T, PiecewiseError>;

/// Value type that can be stored in a persisted [`PiecewiseIndex`].
///
/// `TYPE_TAG` and `WIDTH` are written to the versioned header and verified on
/// read, so an index of `f64` values is never decoded as `u64`.
pub trait PiecewiseValue: Copy + PartialEq + Debug {
    const TYPE_TAG: u8;
    const WIDTH: u8;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn read_value<R: Read>(reader: &mut R) -> io::Result<Self>;
}

impl PiecewiseValue for u8 {
    const TYPE_TAG: u8 = 0;
    const WIDTH: u8 = 1;

    fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(*self)
    }

    fn read_value<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u8()
    }
}

macro_rules! impl_piecewise_value {
    ($ty:ty, $tag:expr, $write:ident, $read:ident) => {
        impl PiecewiseValue for $ty {
            const TYPE_TAG: u8 = $tag;
            const WIDTH: u8 = std::mem::size_of::<$ty>() as u8;

            fn write_value<W: Write>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write::<LittleEndian>(*self)
            }

            fn read_value<R: Read>(reader: &mut R) -> io::Result<Self> {
                reader.$read::<LittleEndian>()
            }
        }
    };
}

impl_piecewise_value!(u16, 1, write_u16, read_u16);
impl_piecewise_value!(u32, 2, write_u32, read_u32);
impl_piecewise_value!(u64, 3, write_u64, read_u64);
impl_piecewise_value!(i32, 4, write_i32, read_i32);
impl_piecewise_value!(i64, 5, write_i64, read_i64);
impl_piecewise_value!(f32, 6, write_f32, read_f32);
impl_piecewise_value!(f64, 7, write_f64, read_f64);

#[binrw]
#[brw(little, magic = b"BQPWIDX\0")]
#[derive(Debug)]
struct PiecewiseHeader {
    version: u8,
    value_tag: u8,
    value_width: u8,
    body_len: u64,
    checksum: u32,
}

/// Half-open interval `[lower, upper)` bound to a value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Interval<T> {
    lower: u64,
    upper: u64,
    value: T,
}

impl<T> Interval<T> {
    #[inline]
    #[must_use]
    pub fn lower(&self) -> u64 {
        self.lower
    }

    #[inline]
    #[must_use]
    pub fn upper(&self) -> u64 {
        self.upper
    }

    #[inline]
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[inline]
    #[must_use]
    pub fn range(&self) -> Range<u64> {
        self.lower..self.upper
    }

    #[inline]
    fn contains(&self, position: u64) -> bool {
        self.lower <= position && position < self.upper
    }
}

/// Piecewise-constant function stored as sorted, disjoint intervals.
///
/// Queries take `&self` and are safe to run concurrently; mutation needs
/// exclusive access.
///
/// # Examples
/// ```
/// use bubblequant::piecewise::PiecewiseIndex;
///
/// let mut index = PiecewiseIndex::new();
/// index.insert(0, 5, 'A').unwrap();
/// index.insert(5, 9, 'B').unwrap();
///
/// assert_eq!(index.value_at(4).unwrap(), 'A');
/// assert_eq!(index.value_at(5).unwrap(), 'B');
/// assert_eq!(index.length().unwrap(), 9);
///
/// let slice = index.slice(3, 8).unwrap();
/// assert_eq!(slice.interval_at(0), Some(0..2));
/// assert_eq!(slice.value_at(2).unwrap(), 'B');
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseIndex<T> {
    intervals: Vec<Interval<T>>,
}

impl<T> Default for PiecewiseIndex<T> {
    fn default() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }
}

impl<T> PiecewiseIndex<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of intervals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.intervals.reserve(additional);
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval<T>> {
        self.intervals.iter()
    }

    #[must_use]
    pub fn intervals(&self) -> &[Interval<T>] {
        &self.intervals
    }

    /// The upper bound of the last interval.
    pub fn length(&self) -> PiecewiseResult<u64> {
        self.intervals
            .last()
            .map(|interval| interval.upper)
            .ok_or(PiecewiseError::EmptyIndex)
    }

    /// Inserts a new interval, keeping the intervals sorted.
    ///
    /// Empty intervals and intervals overlapping one already stored are
    /// rejected and leave the index untouched.
    pub fn insert(&mut self, lower: u64, upper: u64, value: T) -> PiecewiseResult<()> {
        if lower >= upper {
            return Err(PiecewiseError::InvalidInterval(lower, upper));
        }

        let index = self.intervals.partition_point(|interval| interval.lower < lower);
        let neighbors = [index.checked_sub(1), Some(index)];
        for neighbor in neighbors.into_iter().flatten() {
            if let Some(existing) = self.intervals.get(neighbor) {
                if existing.lower < upper && lower < existing.upper {
                    return Err(PiecewiseError::Overlap {
                        new: lower..upper,
                        existing: existing.range(),
                    });
                }
            }
        }

        self.intervals.insert(index, Interval { lower, upper, value });
        Ok(())
    }

    /// Returns the interval with the greatest lower bound that is not larger
    /// than `position`, if it covers `position`.
    #[must_use]
    pub fn find(&self, position: u64) -> Option<&Interval<T>> {
        let index = self
            .intervals
            .partition_point(|interval| interval.lower <= position);

        index
            .checked_sub(1)
            .map(|index| &self.intervals[index])
            .filter(|interval| interval.contains(position))
    }

    /// Returns the `[lower, upper)` range of the interval covering `position`.
    #[must_use]
    pub fn interval_at(&self, position: u64) -> Option<Range<u64>> {
        self.find(position).map(Interval::range)
    }
}

impl<T: Copy + PartialEq> PiecewiseIndex<T> {
    /// Builds the index of a dense vector, merging adjacent equal values into
    /// single intervals.
    ///
    /// # Examples
    /// ```
    /// use bubblequant::piecewise::PiecewiseIndex;
    ///
    /// let index = PiecewiseIndex::from_values(&[1, 1, 1, 2, 2, 1]);
    /// assert_eq!(index.len(), 3);
    /// assert_eq!(index.values(), vec![1, 2, 1]);
    /// ```
    #[must_use]
    pub fn from_values(values: &[T]) -> Self {
        let mut index = Self::new();
        for (position, &value) in values.iter().enumerate() {
            index.extend_run(position as u64 + 1, value);
        }

        index
    }

    /// Extends the domain to `[0, upper)`, binding the newly covered range to
    /// `value`. The last interval is grown instead if it has the same value.
    pub fn push_run(&mut self, upper: u64, value: T) -> PiecewiseResult<()> {
        let lower = self.length().unwrap_or(0);
        if upper <= lower {
            return Err(PiecewiseError::InvalidInterval(lower, upper));
        }

        self.extend_run(upper, value);
        Ok(())
    }

    fn extend_run(&mut self, upper: u64, value: T) {
        match self.intervals.last_mut() {
            Some(last) if last.value == value => last.upper = upper,
            Some(last) => {
                let lower = last.upper;
                self.intervals.push(Interval { lower, upper, value });
            }
            None => self.intervals.push(Interval {
                lower: 0,
                upper,
                value,
            }),
        }
    }

    /// Returns the value at `position`.
    pub fn value_at(&self, position: u64) -> PiecewiseResult<T> {
        self.find(position)
            .map(|interval| interval.value)
            .ok_or(PiecewiseError::OutOfDomain(position))
    }

    /// Values of all intervals, in order.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.intervals.iter().map(|interval| interval.value).collect()
    }

    /// Extracts the function restricted to `[lower, upper)`, shifted so that
    /// it starts at position `0`.
    ///
    /// Intervals crossing the boundaries are clipped. `lower` must be covered
    /// by an interval, the same as for [`PiecewiseIndex::value_at`].
    pub fn slice(&self, lower: u64, upper: u64) -> PiecewiseResult<Self> {
        if lower >= upper {
            return Err(PiecewiseError::InvalidInterval(lower, upper));
        }

        let start = self
            .intervals
            .partition_point(|interval| interval.lower <= lower)
            .checked_sub(1)
            .filter(|&start| self.intervals[start].upper > lower)
            .ok_or(PiecewiseError::OutOfDomain(lower))?;

        let intervals: Vec<Interval<T>> = self.intervals[start..]
            .iter()
            .take_while(|interval| interval.lower < upper)
            .filter_map(|interval| {
                let clipped_lower = interval.lower.max(lower);
                let clipped_upper = interval.upper.min(upper);
                (clipped_lower < clipped_upper).then(|| Interval {
                    lower: clipped_lower - lower,
                    upper: clipped_upper - lower,
                    value: interval.value,
                })
            })
            .collect();

        if intervals.is_empty() {
            return Err(PiecewiseError::OutOfDomain(lower));
        }

        Ok(Self { intervals })
    }
}

impl<T: PiecewiseValue> PiecewiseIndex<T> {
    /// Writes the raw layout (count, then `lower, upper, value` records).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> PiecewiseResult<()> {
        writer.write_u64::<LittleEndian>(self.intervals.len() as u64)?;
        for interval in &self.intervals {
            writer.write_u64::<LittleEndian>(interval.lower)?;
            writer.write_u64::<LittleEndian>(interval.upper)?;
            interval.value.write_value(writer)?;
        }

        Ok(())
    }

    /// Reads the raw layout written by [`PiecewiseIndex::write_to`].
    ///
    /// Every record is validated: intervals must be non-empty, sorted and
    /// disjoint.
    pub fn read_from<R: Read>(reader: &mut R) -> PiecewiseResult<Self> {
        let count = reader.read_u64::<LittleEndian>()?;
        let capacity = usize::try_from(count)
            .unwrap_or(usize::MAX)
            .min(MAX_INITIAL_CAPACITY);
        let mut intervals: Vec<Interval<T>> = Vec::with_capacity(capacity);

        for record in 0..count {
            let lower = reader.read_u64::<LittleEndian>()?;
            let upper = reader.read_u64::<LittleEndian>()?;
            let value = T::read_value(reader)?;

            if lower >= upper {
                return Err(PiecewiseError::malformed(format!(
                    "record {} has empty interval [{}, {})",
                    record, lower, upper
                )));
            }
            if let Some(previous) = intervals.last() {
                if lower < previous.upper {
                    return Err(PiecewiseError::malformed(format!(
                        "record {} at [{}, {}) is unsorted or overlaps [{}, {})",
                        record, lower, upper, previous.lower, previous.upper
                    )));
                }
            }

            intervals.push(Interval { lower, upper, value });
        }

        Ok(Self { intervals })
    }

    /// Writes the versioned format: header followed by the raw layout.
    pub fn write_versioned<W: Write>(&self, mut writer: W) -> PiecewiseResult<()> {
        let mut body = Vec::new();
        self.write_to(&mut body)?;

        let header = PiecewiseHeader {
            version: FORMAT_VERSION,
            value_tag: T::TYPE_TAG,
            value_width: T::WIDTH,
            body_len: body.len() as u64,
            checksum: crc32fast::hash(&body),
        };
        let mut header_data = Cursor::new(Vec::with_capacity(HEADER_LEN));
        header.write_to(&mut header_data)?;

        writer.write_all(header_data.get_ref())?;
        writer.write_all(&body)?;
        writer.flush()?;

        debug!(
            "Written piecewise index: {} intervals, {} bytes",
            self.intervals.len(),
            HEADER_LEN + body.len()
        );
        Ok(())
    }

    /// Reads the versioned format written by
    /// [`PiecewiseIndex::write_versioned`].
    pub fn read_versioned<R: Read>(mut reader: R) -> PiecewiseResult<Self> {
        let mut header_data = [0u8; HEADER_LEN];
        reader.read_exact(&mut header_data)?;
        let header = PiecewiseHeader::read(&mut Cursor::new(&header_data[..]))?;

        if header.version != FORMAT_VERSION {
            return Err(PiecewiseError::InvalidVersion(header.version));
        }
        if (header.value_tag, header.value_width) != (T::TYPE_TAG, T::WIDTH) {
            return Err(PiecewiseError::ValueTypeMismatch {
                expected: (T::TYPE_TAG, T::WIDTH),
                actual: (header.value_tag, header.value_width),
            });
        }

        let mut body = Vec::new();
        reader.by_ref().take(header.body_len).read_to_end(&mut body)?;
        if (body.len() as u64) < header.body_len {
            return Err(PiecewiseError::Truncated);
        }

        let checksum = crc32fast::hash(&body);
        if checksum != header.checksum {
            return Err(PiecewiseError::ChecksumMismatch(checksum, header.checksum));
        }

        let mut body_reader = body.as_slice();
        let index = Self::read_from(&mut body_reader)?;
        if !body_reader.is_empty() {
            return Err(PiecewiseError::malformed(format!(
                "{} trailing bytes after the last record",
                body_reader.len()
            )));
        }

        Ok(index)
    }
}

impl<'a, T> IntoIterator for &'a PiecewiseIndex<T> {
    type Item = &'a Interval<T>;
    type IntoIter = std::slice::Iter<'a, Interval<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Display> Display for PiecewiseIndex<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for interval in &self.intervals {
            writeln!(
                f,
                "[{}, {}): {}",
                interval.lower, interval.upper, interval.value
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind::NotFound;
    use std::io;

    use crate::piecewise::{PiecewiseError, PiecewiseIndex, PiecewiseValue, HEADER_LEN};

    fn example() -> PiecewiseIndex<u32> {
        let mut index = PiecewiseIndex::new();
        index.insert(0, 5, 10).unwrap();
        index.insert(5, 9, 20).unwrap();
        index
    }

    #[test]
    fn test_value_at() {
        let index = example();

        assert_eq!(index.value_at(0).unwrap(), 10);
        assert_eq!(index.value_at(4).unwrap(), 10);
        assert_eq!(index.value_at(5).unwrap(), 20);
        assert_eq!(index.value_at(8).unwrap(), 20);
        assert!(matches!(
            index.value_at(9),
            Err(PiecewiseError::OutOfDomain(9))
        ));
    }

    #[test]
    fn test_value_below_domain() {
        let mut index = PiecewiseIndex::new();
        index.insert(3, 6, 1.5f64).unwrap();

        assert!(matches!(
            index.value_at(2),
            Err(PiecewiseError::OutOfDomain(2))
        ));
        assert_eq!(index.interval_at(2), None);
        assert_eq!(index.interval_at(3), Some(3..6));
    }

    #[test]
    fn test_value_in_gap() {
        let mut index = PiecewiseIndex::new();
        index.insert(0, 2, 1u8).unwrap();
        index.insert(4, 6, 2u8).unwrap();

        assert!(index.value_at(3).is_err());
        assert_eq!(index.interval_at(3), None);
        assert_eq!(index.value_at(4).unwrap(), 2);
    }

    #[test]
    fn test_insert_unordered() {
        let mut index = PiecewiseIndex::new();
        index.insert(5, 9, 'B').unwrap();
        index.insert(0, 5, 'A').unwrap();
        index.insert(9, 10, 'C').unwrap();

        assert_eq!(index.values(), vec!['A', 'B', 'C']);
        assert_eq!(index.length().unwrap(), 10);
    }

    #[test]
    fn test_insert_overlap_rejected() {
        let mut index = example();

        let error = index.insert(4, 6, 30).unwrap_err();
        assert!(matches!(
            error,
            PiecewiseError::Overlap { ref existing, .. } if *existing == (0..5)
        ));
        assert!(index.insert(6, 7, 30).is_err());
        assert!(index.insert(0, 100, 30).is_err());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_insert_invalid_interval() {
        let mut index = PiecewiseIndex::new();

        assert!(matches!(
            index.insert(3, 3, 0u32),
            Err(PiecewiseError::InvalidInterval(3, 3))
        ));
        assert!(index.insert(4, 2, 0u32).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_length_empty() {
        let index: PiecewiseIndex<u32> = PiecewiseIndex::new();

        assert!(matches!(index.length(), Err(PiecewiseError::EmptyIndex)));
    }

    #[test]
    fn test_slice() {
        let slice = example().slice(3, 8).unwrap();

        assert_eq!(slice.len(), 2);
        assert_eq!(slice.interval_at(0), Some(0..2));
        assert_eq!(slice.interval_at(2), Some(2..5));
        assert_eq!(slice.value_at(1).unwrap(), 10);
        assert_eq!(slice.value_at(2).unwrap(), 20);
        assert_eq!(slice.length().unwrap(), 5);
    }

    #[test]
    fn test_slice_inside_single_interval() {
        let slice = example().slice(6, 8).unwrap();

        assert_eq!(slice.len(), 1);
        assert_eq!(slice.interval_at(1), Some(0..2));
        assert_eq!(slice.value_at(0).unwrap(), 20);
    }

    #[test]
    fn test_slice_past_end_clipped() {
        let slice = example().slice(7, 100).unwrap();

        assert_eq!(slice.length().unwrap(), 2);
    }

    #[test]
    fn test_slice_out_of_domain() {
        let mut index = PiecewiseIndex::new();
        index.insert(2, 4, 1u32).unwrap();

        assert!(matches!(
            index.slice(0, 3),
            Err(PiecewiseError::OutOfDomain(0))
        ));
        assert!(matches!(
            index.slice(10, 12),
            Err(PiecewiseError::OutOfDomain(10))
        ));
        assert!(matches!(
            index.slice(3, 3),
            Err(PiecewiseError::InvalidInterval(3, 3))
        ));
    }

    #[test]
    fn test_slice_starting_in_gap() {
        let mut index = PiecewiseIndex::new();
        index.insert(0, 2, 1u32).unwrap();
        index.insert(4, 6, 2u32).unwrap();

        assert!(matches!(
            index.slice(3, 6),
            Err(PiecewiseError::OutOfDomain(3))
        ));
        assert!(index.value_at(3).is_err());

        let slice = index.slice(1, 6).unwrap();
        assert_eq!(slice.interval_at(0), Some(0..1));
        assert_eq!(slice.interval_at(3), Some(3..5));
    }

    #[test]
    fn test_from_values() {
        let index = PiecewiseIndex::from_values(&[7.5, 7.5, 3.0, 3.0, 3.0, 7.5]);

        assert_eq!(index.len(), 3);
        assert_eq!(index.interval_at(1), Some(0..2));
        assert_eq!(index.interval_at(4), Some(2..5));
        assert_eq!(index.value_at(5).unwrap(), 7.5);
        assert_eq!(index.length().unwrap(), 6);

        let empty: PiecewiseIndex<u32> = PiecewiseIndex::from_values(&[]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_push_run() {
        let mut index = PiecewiseIndex::new();
        index.push_run(3, 1u32).unwrap();
        index.push_run(5, 1u32).unwrap();
        index.push_run(6, 2u32).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.interval_at(4), Some(0..5));
        assert!(matches!(
            index.push_run(6, 3),
            Err(PiecewiseError::InvalidInterval(6, 6))
        ));
    }

    #[test]
    fn test_clear() {
        let mut index = example();
        index.clear();

        assert!(index.is_empty());
        assert!(index.value_at(0).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(example().to_string(), "[0, 5): 10\n[5, 9): 20\n");
    }

    #[test]
    fn test_raw_layout() {
        let mut data = Vec::new();
        example().write_to(&mut data).unwrap();

        assert_eq!(data.len(), 8 + 2 * (8 + 8 + 4));
        assert_eq!(&data[..8], &2u64.to_le_bytes());
        assert_eq!(&data[8..16], &0u64.to_le_bytes());
        assert_eq!(&data[16..24], &5u64.to_le_bytes());
        assert_eq!(&data[24..28], &10u32.to_le_bytes());
    }

    #[test]
    fn test_write_and_read() {
        let mut index = PiecewiseIndex::new();
        index.insert(0, 100, 230.25f64).unwrap();
        index.insert(100, 101, 1.0f64).unwrap();
        index.insert(200, 250, 12.5f64).unwrap();

        let mut data = Vec::new();
        index.write_to(&mut data).unwrap();
        let index_2 = PiecewiseIndex::<f64>::read_from(&mut data.as_slice()).unwrap();

        assert_eq!(index, index_2);
        for position in 0..260 {
            assert_eq!(
                index.value_at(position).ok(),
                index_2.value_at(position).ok()
            );
        }
    }

    #[test]
    fn test_read_truncated() {
        let mut data = Vec::new();
        example().write_to(&mut data).unwrap();

        for len in [0, 7, 8, 20, data.len() - 1] {
            let result = PiecewiseIndex::<u32>::read_from(&mut &data[..len]);
            assert!(
                matches!(result, Err(PiecewiseError::Truncated)),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_read_huge_count_truncated() {
        let data = u64::MAX.to_le_bytes();

        let result = PiecewiseIndex::<u64>::read_from(&mut &data[..]);
        assert!(matches!(result, Err(PiecewiseError::Truncated)));
    }

    #[test]
    fn test_read_malformed() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u64.to_le_bytes());
        for (lower, upper) in [(0u64, 5u64), (3, 9)] {
            data.extend_from_slice(&lower.to_le_bytes());
            data.extend_from_slice(&upper.to_le_bytes());
            data.push(1);
        }

        let result = PiecewiseIndex::<u8>::read_from(&mut data.as_slice());
        assert!(matches!(result, Err(PiecewiseError::Malformed(_))));

        let mut data = Vec::new();
        data.extend_from_slice(&1u64.to_le_bytes());
        data.extend_from_slice(&4u64.to_le_bytes());
        data.extend_from_slice(&4u64.to_le_bytes());
        data.push(1);

        let result = PiecewiseIndex::<u8>::read_from(&mut data.as_slice());
        assert!(matches!(result, Err(PiecewiseError::Malformed(_))));
    }

    #[test]
    fn test_versioned_write_and_read() {
        let index = PiecewiseIndex::from_values(&[1u16, 1, 2, 3, 3, 3]);

        let mut data = Vec::new();
        index.write_versioned(&mut data).unwrap();
        assert_eq!(&data[..8], b"BQPWIDX\0");

        let index_2 = PiecewiseIndex::<u16>::read_versioned(data.as_slice()).unwrap();
        assert_eq!(index, index_2);
    }

    #[test]
    fn test_versioned_type_mismatch() {
        let mut data = Vec::new();
        PiecewiseIndex::from_values(&[1.0f64, 2.0])
            .write_versioned(&mut data)
            .unwrap();

        let result = PiecewiseIndex::<u64>::read_versioned(data.as_slice());
        assert!(matches!(
            result,
            Err(PiecewiseError::ValueTypeMismatch {
                expected: (3, 8),
                actual: (7, 8)
            })
        ));
    }

    #[test]
    fn test_versioned_invalid_version() {
        let mut data = Vec::new();
        example().write_versioned(&mut data).unwrap();
        data[8] = 42;

        let result = PiecewiseIndex::<u32>::read_versioned(data.as_slice());
        assert!(matches!(result, Err(PiecewiseError::InvalidVersion(42))));
    }

    #[test]
    fn test_versioned_bad_magic() {
        let mut data = Vec::new();
        example().write_versioned(&mut data).unwrap();
        data[0] = b'X';

        let result = PiecewiseIndex::<u32>::read_versioned(data.as_slice());
        assert!(matches!(result, Err(PiecewiseError::SerializeError(_))));
    }

    #[test]
    fn test_versioned_checksum_mismatch() {
        let mut data = Vec::new();
        example().write_versioned(&mut data).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let result = PiecewiseIndex::<u32>::read_versioned(data.as_slice());
        assert!(matches!(result, Err(PiecewiseError::ChecksumMismatch(_, _))));
    }

    #[test]
    fn test_versioned_truncated() {
        let mut data = Vec::new();
        example().write_versioned(&mut data).unwrap();

        for len in [0, HEADER_LEN - 1, HEADER_LEN, data.len() - 1] {
            let result = PiecewiseIndex::<u32>::read_versioned(&data[..len]);
            assert!(
                matches!(result, Err(PiecewiseError::Truncated)),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_value_codec_widths() {
        fn width_of<T: PiecewiseValue>(value: T) -> usize {
            let mut data = Vec::new();
            value.write_value(&mut data).unwrap();
            assert_eq!(T::read_value(&mut data.as_slice()).unwrap(), value);
            data.len()
        }

        assert_eq!(width_of(7u8), 1);
        assert_eq!(width_of(7u16), 2);
        assert_eq!(width_of(-7i32), 4);
        assert_eq!(width_of(7.25f32), 4);
        assert_eq!(width_of(-7i64), 8);
        assert_eq!(width_of(7.25f64), 8);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            PiecewiseError::OutOfDomain(3).to_string(),
            "Position 3 is not covered by any interval"
        );
        assert_eq!(
            PiecewiseError::from(io::Error::from(NotFound)).to_string(),
            "IO error: entity not found"
        );
        assert_eq!(
            PiecewiseError::from(io::Error::from(io::ErrorKind::UnexpectedEof)).to_string(),
            "Unexpected end of data"
        );
        assert_eq!(
            PiecewiseError::Overlap {
                new: 1..3,
                existing: 0..2
            }
            .to_string(),
            "Interval [1, 3) overlaps existing interval [0, 2)"
        );
    }
}
