//! Common PostgreSQL wire protocol types.

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Big-endian integer views used by zero-copy message parsers.
pub type I16BE = zerocopy::byteorder::big_endian::I16;
pub type I32BE = zerocopy::byteorder::big_endian::I32;
pub type U16BE = zerocopy::byteorder::big_endian::U16;
pub type U32BE = zerocopy::byteorder::big_endian::U32;

/// Data format code in PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

/// Transaction status indicator from ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in transaction block)
    #[default]
    Idle = b'I',
    /// In transaction block
    InTransaction = b'T',
    /// In failed transaction block (queries will be rejected until rollback)
    Failed = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from a raw byte value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (either active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }

    /// Returns true if the transaction has failed.
    pub fn is_failed(self) -> bool {
        matches!(self, TransactionStatus::Failed)
    }
}

/// Well-known PostgreSQL type OIDs.
pub mod oid {
    use super::Oid;

    /// boolean, format 't'/'f'
    pub const BOOL: Oid = 16;
    /// variable-length byte string
    pub const BYTEA: Oid = 17;
    /// single character
    pub const CHAR: Oid = 18;
    /// 63-byte type for storing system identifiers
    pub const NAME: Oid = 19;
    /// 8-byte integer
    pub const INT8: Oid = 20;
    /// 2-byte integer
    pub const INT2: Oid = 21;
    /// 4-byte integer
    pub const INT4: Oid = 23;
    /// variable-length string, no limit specified
    pub const TEXT: Oid = 25;
    /// object identifier(oid), maximum 4 billion
    pub const OID: Oid = 26;
    /// JSON stored as text
    pub const JSON: Oid = 114;
    /// XML content
    pub const XML: Oid = 142;
    /// single-precision floating point number
    pub const FLOAT4: Oid = 700;
    /// double-precision floating point number
    pub const FLOAT8: Oid = 701;
    /// pseudo-type representing an undetermined type
    pub const UNKNOWN: Oid = 705;
    /// monetary amounts
    pub const MONEY: Oid = 790;
    /// IP address/netmask
    pub const INET: Oid = 869;
    /// 'char(length)' blank-padded string
    pub const BPCHAR: Oid = 1042;
    /// 'varchar(length)' non-blank-padded string
    pub const VARCHAR: Oid = 1043;
    /// date
    pub const DATE: Oid = 1082;
    /// time of day
    pub const TIME: Oid = 1083;
    /// date and time
    pub const TIMESTAMP: Oid = 1114;
    /// date and time with time zone
    pub const TIMESTAMPTZ: Oid = 1184;
    /// time interval
    pub const INTERVAL: Oid = 1186;
    /// time of day with time zone
    pub const TIMETZ: Oid = 1266;
    /// arbitrary precision number
    pub const NUMERIC: Oid = 1700;
    /// pseudo-type representing any composite type
    pub const RECORD: Oid = 2249;
    /// pseudo-type for functions with no real result
    pub const VOID: Oid = 2278;
    /// UUID
    pub const UUID: Oid = 2950;
    /// Binary JSON
    pub const JSONB: Oid = 3802;
    /// range of integers
    pub const INT4RANGE: Oid = 3904;
    /// range of numerics
    pub const NUMRANGE: Oid = 3906;
    /// range of timestamps without time zone
    pub const TSRANGE: Oid = 3908;
    /// range of timestamps with time zone
    pub const TSTZRANGE: Oid = 3910;
    /// range of dates
    pub const DATERANGE: Oid = 3912;
    /// range of bigints
    pub const INT8RANGE: Oid = 3926;

    // Array element containers

    /// array of bool
    pub const BOOL_ARRAY: Oid = 1000;
    /// array of bytea
    pub const BYTEA_ARRAY: Oid = 1001;
    /// array of name
    pub const NAME_ARRAY: Oid = 1003;
    /// array of int2
    pub const INT2_ARRAY: Oid = 1005;
    /// array of int4
    pub const INT4_ARRAY: Oid = 1007;
    /// array of text
    pub const TEXT_ARRAY: Oid = 1009;
    /// array of int8
    pub const INT8_ARRAY: Oid = 1016;
    /// array of float4
    pub const FLOAT4_ARRAY: Oid = 1021;
    /// array of float8
    pub const FLOAT8_ARRAY: Oid = 1022;
    /// array of oid
    pub const OID_ARRAY: Oid = 1028;
    /// array of varchar
    pub const VARCHAR_ARRAY: Oid = 1015;
    /// array of timestamp
    pub const TIMESTAMP_ARRAY: Oid = 1115;
    /// array of date
    pub const DATE_ARRAY: Oid = 1182;
    /// array of time
    pub const TIME_ARRAY: Oid = 1183;
    /// array of timestamptz
    pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
    /// array of numeric
    pub const NUMERIC_ARRAY: Oid = 1231;
    /// array of uuid
    pub const UUID_ARRAY: Oid = 2951;
    /// array of jsonb
    pub const JSONB_ARRAY: Oid = 3807;
}
