//! Typed decoding of result columns into Rust values.
//!
//! [`FromWire`] decodes one column given its type OID and wire format;
//! [`FromRow`] assembles tuples of `FromWire` targets from a full row.
//! Parameters travel the other way as [`crate::types::Value`]s through the
//! connection's type registry.

mod bytes;
mod primitives;
mod string;

#[cfg(feature = "with-chrono")]
mod chrono;
#[cfg(feature = "with-uuid")]
mod uuid;

use crate::error::{Error, Result};
use crate::protocol::backend::query::OwnedFieldDescription;
use crate::protocol::types::{FormatCode, Oid};

/// Decode a single column value from the wire.
///
/// The OID parameter lets implementations check the PostgreSQL type and
/// reject incompatible columns with a clear error.
pub trait FromWire<'a>: Sized {
    /// Decode from NULL.
    ///
    /// The default rejects NULL; `Option<T>` overrides it.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode from text format bytes.
    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self>;

    /// Decode from binary format bytes.
    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self>;
}

/// Decode one column according to its field description.
pub fn decode_column<'a, T: FromWire<'a>>(
    field: &OwnedFieldDescription,
    value: Option<&'a [u8]>,
) -> Result<T> {
    match value {
        None => T::from_null(),
        Some(bytes) => match field.format {
            FormatCode::Text => T::from_text(field.type_oid, bytes),
            FormatCode::Binary => T::from_binary(field.type_oid, bytes),
        },
    }
}

// === Option<T> - NULL handling ===

impl<'a, T: FromWire<'a>> FromWire<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(oid, bytes).map(Some)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(oid, bytes).map(Some)
    }
}

/// Decode a whole row into a tuple of typed targets.
pub trait FromRow<'a>: Sized {
    /// Decode a row using its column metadata.
    fn from_row(fields: &[OwnedFieldDescription], columns: &[Option<&'a [u8]>]) -> Result<Self>;
}

macro_rules! impl_from_row {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<'a, $($T: FromWire<'a>),+> FromRow<'a> for ($($T,)+) {
            fn from_row(
                fields: &[OwnedFieldDescription],
                columns: &[Option<&'a [u8]>],
            ) -> Result<Self> {
                if fields.len() < $count || columns.len() < $count {
                    return Err(Error::Decode(format!(
                        "row has {} columns, tuple needs {}",
                        columns.len().min(fields.len()),
                        $count
                    )));
                }
                Ok(($(decode_column(&fields[$idx], columns[$idx])?,)+))
            }
        }
    };
}

impl_from_row!(1, 0: T0);
impl_from_row!(2, 0: T0, 1: T1);
impl_from_row!(3, 0: T0, 1: T1, 2: T2);
impl_from_row!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_from_row!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_from_row!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_from_row!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_from_row!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_from_row!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_from_row!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_from_row!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_from_row!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

#[cfg(test)]
pub(crate) fn test_field(type_oid: Oid, format: FormatCode) -> OwnedFieldDescription {
    OwnedFieldDescription {
        name: "col".into(),
        table_oid: 0,
        column_id: 0,
        type_oid,
        type_size: -1,
        type_modifier: -1,
        format,
    }
}
