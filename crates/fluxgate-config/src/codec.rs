//! Record codec — maps typed records to and from flat string hashes.
//!
//! Every record type declares a static field table. [`decode_into`] walks
//! that table and pulls matching keys out of a source hash; [`encode`]
//! walks it the other way for field-level upserts. Only two field kinds
//! exist: text (assigned verbatim) and integer (base-10 `i64`). Flags are
//! modelled as 0/1 integers.

use std::collections::HashMap;
use std::num::ParseIntError;

use thiserror::Error;

/// A value that could not be parsed into its declared field kind.
///
/// Decoding stops at the first such field. Fields processed before it
/// keep their new values; the failing field itself is never touched.
#[derive(Debug, Error)]
#[error("field `{field}`: cannot parse {value:?} as integer: {source}")]
pub struct DecodeError {
    pub field: &'static str,
    pub value: String,
    #[source]
    pub source: ParseIntError,
}

/// Accessors for one field, by kind.
pub enum Slot<R> {
    Text {
        get: fn(&R) -> String,
        set: fn(&mut R, String),
    },
    Int {
        get: fn(&R) -> i64,
        set: fn(&mut R, i64),
    },
}

/// One entry of a record's field table.
pub struct Field<R> {
    /// Store key: the lower-cased field name.
    pub key: &'static str,
    pub slot: Slot<R>,
}

impl<R> Field<R> {
    pub const fn text(key: &'static str, get: fn(&R) -> String, set: fn(&mut R, String)) -> Self {
        Self {
            key,
            slot: Slot::Text { get, set },
        }
    }

    pub const fn int(key: &'static str, get: fn(&R) -> i64, set: fn(&mut R, i64)) -> Self {
        Self {
            key,
            slot: Slot::Int { get, set },
        }
    }
}

/// A configuration record stored as a flat hash.
pub trait Record: Sized + 'static {
    /// Field table, in declaration order.
    const FIELDS: &'static [Field<Self>];
}

/// Build a field table inside an `impl Record` block.
///
/// ```ignore
/// const FIELDS: &'static [Field<Self>] = record_fields![
///     text "url" => url,
///     int "interval" => interval,
/// ];
/// ```
macro_rules! record_fields {
    ($($kind:ident $key:literal => $field:ident),* $(,)?) => {
        &[$($crate::codec::record_fields!(@field $kind $key $field)),*]
    };
    (@field text $key:literal $field:ident) => {
        $crate::codec::Field::<Self>::text($key, |r| r.$field.clone(), |r, v| r.$field = v)
    };
    (@field int $key:literal $field:ident) => {
        $crate::codec::Field::<Self>::int($key, |r| r.$field, |r, v| r.$field = v)
    };
}

pub(crate) use record_fields;

/// Populate `dest` from `source`.
///
/// Keys absent from `source` leave the destination field untouched;
/// keys unknown to the record are ignored.
pub fn decode_into<R: Record>(
    source: &HashMap<String, String>,
    dest: &mut R,
) -> Result<(), DecodeError> {
    for field in R::FIELDS {
        let Some(raw) = source.get(field.key) else {
            continue;
        };
        match &field.slot {
            Slot::Text { set, .. } => set(dest, raw.clone()),
            Slot::Int { set, .. } => {
                let value = raw.parse::<i64>().map_err(|source| DecodeError {
                    field: field.key,
                    value: raw.clone(),
                    source,
                })?;
                set(dest, value);
            }
        }
    }
    Ok(())
}

/// Decode a fresh record, starting from its default value.
pub fn decode<R: Record + Default>(source: &HashMap<String, String>) -> Result<R, DecodeError> {
    let mut record = R::default();
    decode_into(source, &mut record)?;
    Ok(record)
}

/// Render every field of `record` as a `(key, value)` pair.
pub fn encode<R: Record>(record: &R) -> Vec<(&'static str, String)> {
    R::FIELDS
        .iter()
        .map(|field| {
            let value = match &field.slot {
                Slot::Text { get, .. } => get(record),
                Slot::Int { get, .. } => get(record).to_string(),
            };
            (field.key, value)
        })
        .collect()
}
