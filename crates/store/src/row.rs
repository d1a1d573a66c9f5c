//! One log entry: an ordered list of optional byte strings

use bytes::Bytes;

/// Longest value stored for a single column; longer values are cut
pub const MAX_FIELD_LEN: usize = 4096;

/// One logged request, positionally aligned with its table's columns
///
/// `None` is written as SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<Bytes>>,
}

impl Row {
    #[inline]
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        Self { values }
    }

    /// Row of non-null text values
    pub fn from_texts<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .map(|s| Some(Bytes::copy_from_slice(s.as_ref().as_bytes())))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    #[inline]
    pub fn values(&self) -> &[Option<Bytes>] {
        &self.values
    }

    #[inline]
    pub fn into_values(self) -> Vec<Option<Bytes>> {
        self.values
    }

    /// Total bytes across all non-null values
    pub fn payload_len(&self) -> usize {
        self.values.iter().flatten().map(Bytes::len).sum()
    }
}

impl FromIterator<Option<Bytes>> for Row {
    fn from_iter<T: IntoIterator<Item = Option<Bytes>>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
