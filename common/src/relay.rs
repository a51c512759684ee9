//! Large-payload relay.
//!
//! A payload too big for one binder transaction is exposed as a dataset
//! with exactly one row and one blob column, so the peer can pull it over
//! the bulk-read path instead of the message path.

use std::{fmt, sync::Arc};

use crate::error::RelayError;

/// Name of the relay's only column.
pub const BLOB_COLUMN: &str = "blob";

const COLUMNS: [&str; 1] = [BLOB_COLUMN];

/// Row-oriented dataset read through a movable cursor, in the shape the
/// platform's bulk-read path consumes.
pub trait Dataset {
    fn row_count(&self) -> usize;
    fn column_names(&self) -> &[&'static str];

    fn column_count(&self) -> usize {
        self.column_names().len()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names().iter().position(|c| *c == name)
    }

    /// Current row, or `None` before the first / after the last row.
    fn position(&self) -> Option<usize>;

    /// Moves to `row`; returns whether the cursor now sits on a row.
    fn move_to_position(&mut self, row: usize) -> bool;

    fn move_to_first(&mut self) -> bool {
        self.move_to_position(0)
    }

    fn get_blob(&self, column: usize) -> Result<&[u8], RelayError>;
    fn get_string(&self, column: usize) -> Result<String, RelayError>;
    fn get_short(&self, column: usize) -> Result<i16, RelayError>;
    fn get_int(&self, column: usize) -> Result<i32, RelayError>;
    fn get_long(&self, column: usize) -> Result<i64, RelayError>;
    fn get_float(&self, column: usize) -> Result<f32, RelayError>;
    fn get_double(&self, column: usize) -> Result<f64, RelayError>;
    fn is_null(&self, column: usize) -> Result<bool, RelayError>;
}

/// Single-row, single-column dataset wrapping one immutable blob.
#[derive(Clone)]
pub struct BlobRelay {
    blob:     Arc<[u8]>,
    position: Option<usize>,
}

impl BlobRelay {
    pub fn new<B: Into<Arc<[u8]>>>(blob: B) -> Self {
        Self {
            blob:     blob.into(),
            position: None,
        }
    }

    /// Length of the wrapped blob in bytes.
    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    /// Moves to the only row and copies its blob out.
    pub fn read_blob(mut self) -> Result<Vec<u8>, RelayError> {
        self.move_to_first();
        self.get_blob(0).map(<[u8]>::to_vec)
    }
}

impl Dataset for BlobRelay {
    fn row_count(&self) -> usize {
        1
    }

    fn column_names(&self) -> &[&'static str] {
        &COLUMNS
    }

    fn position(&self) -> Option<usize> {
        self.position
    }

    fn move_to_position(&mut self, row: usize) -> bool {
        self.position = (row == 0).then_some(0);
        self.position.is_some()
    }

    fn get_blob(&self, column: usize) -> Result<&[u8], RelayError> {
        if column != 0 {
            return Err(RelayError::ColumnOutOfRange(column));
        }
        if self.position != Some(0) {
            return Err(RelayError::NotOnRow);
        }
        Ok(&self.blob)
    }

    fn get_string(&self, _column: usize) -> Result<String, RelayError> {
        Err(RelayError::Unsupported("get_string"))
    }

    fn get_short(&self, _column: usize) -> Result<i16, RelayError> {
        Err(RelayError::Unsupported("get_short"))
    }

    fn get_int(&self, _column: usize) -> Result<i32, RelayError> {
        Err(RelayError::Unsupported("get_int"))
    }

    fn get_long(&self, _column: usize) -> Result<i64, RelayError> {
        Err(RelayError::Unsupported("get_long"))
    }

    fn get_float(&self, _column: usize) -> Result<f32, RelayError> {
        Err(RelayError::Unsupported("get_float"))
    }

    fn get_double(&self, _column: usize) -> Result<f64, RelayError> {
        Err(RelayError::Unsupported("get_double"))
    }

    fn is_null(&self, _column: usize) -> Result<bool, RelayError> {
        Err(RelayError::Unsupported("is_null"))
    }
}

impl fmt::Debug for BlobRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobRelay")
            .field("len", &self.blob.len())
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_single_cell(relay: &BlobRelay) {
        assert_eq!(relay.row_count(), 1);
        assert_eq!(relay.column_count(), 1);
        assert_eq!(relay.column_names(), &[BLOB_COLUMN]);
        assert_eq!(relay.column_index(BLOB_COLUMN), Some(0));
        assert_eq!(relay.column_index("name"), None);
    }

    #[test]
    fn shape_does_not_depend_on_blob_size() {
        let empty = BlobRelay::new(Vec::<u8>::new());
        let large = BlobRelay::new(vec![0x5au8; 8 * 1024 * 1024]);

        assert_single_cell(&empty);
        assert_single_cell(&large);
        assert_eq!(empty.read_blob().unwrap(), Vec::<u8>::new());
        assert_eq!(large.read_blob().unwrap().len(), 8 * 1024 * 1024);
    }

    #[test]
    fn blob_requires_cursor_on_the_row() {
        let mut relay = BlobRelay::new(b"payload".to_vec());
        assert_eq!(relay.get_blob(0), Err(RelayError::NotOnRow));

        assert!(relay.move_to_first());
        assert_eq!(relay.get_blob(0).unwrap(), b"payload");
        assert_eq!(relay.get_blob(1), Err(RelayError::ColumnOutOfRange(1)));

        assert!(!relay.move_to_position(1));
        assert_eq!(relay.position(), None);
        assert_eq!(relay.get_blob(0), Err(RelayError::NotOnRow));
    }

    #[test]
    fn typed_accessors_fail_fast() {
        let mut relay = BlobRelay::new(b"42".to_vec());
        relay.move_to_first();

        assert_eq!(relay.get_string(0), Err(RelayError::Unsupported("get_string")));
        assert_eq!(relay.get_short(0), Err(RelayError::Unsupported("get_short")));
        assert_eq!(relay.get_int(0), Err(RelayError::Unsupported("get_int")));
        assert_eq!(relay.get_long(0), Err(RelayError::Unsupported("get_long")));
        assert_eq!(relay.get_float(0), Err(RelayError::Unsupported("get_float")));
        assert_eq!(relay.get_double(0), Err(RelayError::Unsupported("get_double")));
        assert_eq!(relay.is_null(0), Err(RelayError::Unsupported("is_null")));
    }
}
