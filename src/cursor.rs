//! Record iteration shared by queries and subscriptions.

use crate::error::Result;
use crate::types::EventRecord;

/// A cursor that advances one record at a time.
pub trait RecordCursor {
    /// Move to the next record. `Ok(false)` when none is available.
    fn advance(&mut self) -> Result<bool>;

    /// Materialize the current record.
    fn current(&self) -> Result<EventRecord>;

    /// Release the current record's provider resource.
    fn release_current(&mut self);
}

/// Single-pass iterator returned by `each()`.
///
/// The per-record resource is released after every item. The iterator
/// ends at the first error.
pub struct Records<'a, C: RecordCursor + ?Sized> {
    cursor: &'a mut C,
    done: bool,
}

impl<'a, C: RecordCursor + ?Sized> Records<'a, C> {
    pub(crate) fn new(cursor: &'a mut C) -> Self {
        Self {
            cursor,
            done: false,
        }
    }
}

impl<C: RecordCursor + ?Sized> Iterator for Records<'_, C> {
    type Item = Result<EventRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.advance() {
            Ok(true) => {
                let record = self.cursor.current();
                self.cursor.release_current();
                if record.is_err() {
                    self.done = true;
                }
                Some(record)
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<C: RecordCursor + ?Sized> std::iter::FusedIterator for Records<'_, C> {}
