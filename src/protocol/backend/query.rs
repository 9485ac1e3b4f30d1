//! Query-related backend messages.

use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::Cursor;
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Field name
    pub name: &'a str,
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    /// Table OID (0 if not a table column)
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    /// Column attribute number (0 if not a table column)
    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    /// Data type OID
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// Type size (-1 for variable, -2 for null-terminated)
    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    /// Type modifier (type-specific)
    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    /// Format code (0=text, 1=binary)
    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }

    /// Make an owned copy of this field description.
    pub fn to_owned(&self) -> OwnedFieldDescription {
        OwnedFieldDescription {
            name: self.name.to_string(),
            table_oid: self.table_oid(),
            column_id: self.column_id(),
            type_oid: self.type_oid(),
            type_size: self.type_size(),
            type_modifier: self.type_modifier(),
            format: self.format(),
        }
    }
}

/// Owned column header, detached from the wire buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFieldDescription {
    /// Field name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    /// Type modifier (type-specific)
    pub type_modifier: i32,
    /// Format code the server will use for this column
    pub format: FormatCode,
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let mut msg = Cursor::new(payload);
        let num_fields = msg.u16()? as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = msg.cstr()?;
            let tail = FieldDescriptionTail::ref_from_bytes(msg.bytes(TAIL_SIZE)?)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;

            fields.push(FieldDescription { name, tail });
        }

        Ok(Self { fields })
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get field descriptions.
    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }

    /// Make owned copies of every field description.
    pub fn to_owned_fields(&self) -> Vec<OwnedFieldDescription> {
        self.fields.iter().map(|f| f.to_owned()).collect()
    }

    /// Iterate over field descriptions.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }
}

/// DataRow message - contains a single row of data.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    /// Number of columns
    num_columns: u16,
    /// Column data (after the column count)
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut msg = Cursor::new(payload);
        Ok(Self {
            num_columns: msg.u16()?,
            columns_data: msg.rest(),
        })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Create an iterator over column values.
    ///
    /// Each item is `Option<&[u8]>` where `None` represents NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }

    /// Get a column value by index.
    ///
    /// Returns `None` if the column is NULL, `Some(bytes)` otherwise.
    pub fn get(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.iter().nth(index)
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut cur = Cursor::new(self.remaining);
        let len = cur.i32().ok()?;

        // A length of -1 marks NULL
        let item = if len < 0 {
            None
        } else {
            Some(cur.bytes(len as usize).ok()?)
        };
        self.remaining = cur.rest();
        Some(item)
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        Ok(Self {
            tag: Cursor::new(payload).cstr()?,
        })
    }

    /// Parse the number of rows affected from the command tag.
    ///
    /// Returns `Some(count)` for commands like SELECT, INSERT, UPDATE, DELETE.
    /// Returns `None` for other commands or parse failures.
    pub fn rows_affected(&self) -> Option<u64> {
        // Command tags are like:
        // - "SELECT 5"
        // - "INSERT 0 1" (oid, rows)
        // - "UPDATE 10"
        let parts: Vec<&str> = self.tag.split_whitespace().collect();

        match parts.as_slice() {
            ["SELECT", count] => count.parse().ok(),
            ["INSERT", _oid, count] => count.parse().ok(),
            ["UPDATE", count] => count.parse().ok(),
            ["DELETE", count] => count.parse().ok(),
            ["COPY", count] => count.parse().ok(),
            ["MOVE", count] => count.parse().ok(),
            ["FETCH", count] => count.parse().ok(),
            _ => None,
        }
    }

    /// Get the command name from the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

/// EmptyQueryResponse message - response to an empty query string.
#[derive(Debug, Clone, Copy)]
pub struct EmptyQueryResponse;

impl EmptyQueryResponse {
    /// Parse an EmptyQueryResponse message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description_payload() -> Vec<u8> {
        let mut buf = 1_u16.to_be_bytes().to_vec();
        buf.extend_from_slice(b"id\0");
        buf.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        buf.extend_from_slice(&0_i16.to_be_bytes()); // column id
        buf.extend_from_slice(&23_u32.to_be_bytes()); // int4
        buf.extend_from_slice(&4_i16.to_be_bytes()); // size
        buf.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
        buf.extend_from_slice(&1_u16.to_be_bytes()); // binary
        buf
    }

    #[test]
    fn row_description_parse() {
        let payload = row_description_payload();
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 1);
        let field = &desc.fields()[0];
        assert_eq!(field.name, "id");
        assert_eq!(field.type_oid(), 23);
        assert_eq!(field.format(), FormatCode::Binary);
    }

    #[test]
    fn data_row_nulls_and_values() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // NULL
        payload.extend_from_slice(&4_i32.to_be_bytes());
        payload.extend_from_slice(&42_i32.to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.len(), 2);
        let mut iter = row.iter();
        assert_eq!(iter.next(), Some(None));
        assert_eq!(iter.next(), Some(Some(&42_i32.to_be_bytes()[..])));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn command_tag_rows_affected() {
        assert_eq!(
            CommandComplete { tag: "INSERT 0 3" }.rows_affected(),
            Some(3)
        );
        assert_eq!(CommandComplete { tag: "SELECT 5" }.rows_affected(), Some(5));
        assert_eq!(CommandComplete { tag: "UPDATE 10" }.rows_affected(), Some(10));
        assert_eq!(CommandComplete { tag: "BEGIN" }.rows_affected(), None);
        assert_eq!(CommandComplete { tag: "COPY 7" }.rows_affected(), Some(7));
    }

    #[test]
    fn truncated_row_description() {
        assert!(RowDescription::parse(&[0]).is_err());
    }
}
