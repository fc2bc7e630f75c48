//! B-tree cells hold records, which contain SQL rows, and are addressed by
//! order-preserving keys.
//!
//! Two codecs live here:
//!
//! * The row codec.  A record is a header (field count, then one type tag
//!   byte per field) followed by the field bodies.  INT bodies are 8-byte
//!   big-endian signed; STR bodies are a u32 length plus UTF-8 bytes; NULL
//!   has no body.
//! * The key codec.  Keys are byte strings whose lexicographic order equals
//!   the semantic order NULL < INT < STR, with INTs ordered numerically and
//!   STRs byte-wise.  Index trees append the primary key after the indexed
//!   value, so STR key bytes are escaped (0x00 becomes 0x00 0xFF) and
//!   terminated with 0x00 0x00 to keep prefix boundaries unambiguous.

use byteorder::{BigEndian, ByteOrder};

use crate::errors::{Error, Result};
use crate::sql_value::SqlValue;
use crate::typed_row::Row;

// Row codec type tags.
const FIELD_NULL: u8 = 0x00;
const FIELD_INT: u8 = 0x01;
const FIELD_STR: u8 = 0x02;

// Key codec type tags.  Tag order is the cross-type sort order.
const KEY_NULL: u8 = 0x01;
const KEY_INT: u8 = 0x02;
const KEY_STR: u8 = 0x03;

/// Encodes a row of values in record format.
/// `Real` values are runtime-only and cannot be stored.
pub fn encode_row(row: &Row) -> Result<Vec<u8>> {
    let n = row.items.len();
    if n > u16::MAX as usize {
        return Err(Error::internal("row has too many fields to encode"));
    }
    let mut out = Vec::with_capacity(2 + n * 9);
    out.extend_from_slice(&(n as u16).to_be_bytes());
    for v in &row.items {
        out.push(match v {
            SqlValue::Null => FIELD_NULL,
            SqlValue::Int(_) => FIELD_INT,
            SqlValue::Str(_) => FIELD_STR,
            SqlValue::Real(_) => {
                return Err(Error::internal("REAL values are not storable"));
            }
        });
    }
    for v in &row.items {
        match v {
            SqlValue::Null => {}
            SqlValue::Int(i) => out.extend_from_slice(&i.to_be_bytes()),
            SqlValue::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            SqlValue::Real(_) => unreachable!(),
        }
    }
    Ok(out)
}

/// Decodes a record produced by [`encode_row`].
pub fn decode_row(buf: &[u8]) -> Result<Row> {
    if buf.len() < 2 {
        return Err(Error::corrupt("record shorter than its header"));
    }
    let n = BigEndian::read_u16(&buf[0..2]) as usize;
    if buf.len() < 2 + n {
        return Err(Error::corrupt("record header truncated"));
    }
    let tags = &buf[2..2 + n];
    let mut pos = 2 + n;
    let mut items = Vec::with_capacity(n);
    for tag in tags {
        match *tag {
            FIELD_NULL => items.push(SqlValue::Null),
            FIELD_INT => {
                if buf.len() < pos + 8 {
                    return Err(Error::corrupt("record INT body truncated"));
                }
                items.push(SqlValue::Int(BigEndian::read_i64(&buf[pos..pos + 8])));
                pos += 8;
            }
            FIELD_STR => {
                if buf.len() < pos + 4 {
                    return Err(Error::corrupt("record STR length truncated"));
                }
                let len = BigEndian::read_u32(&buf[pos..pos + 4]) as usize;
                pos += 4;
                if buf.len() < pos + len {
                    return Err(Error::corrupt("record STR body truncated"));
                }
                let s = std::str::from_utf8(&buf[pos..pos + len])
                    .map_err(|_| Error::corrupt("record STR body is not UTF-8"))?;
                items.push(SqlValue::Str(s.to_string()));
                pos += len;
            }
            t => {
                return Err(Error::corrupt(format!("unknown record type tag 0x{:02x}", t)));
            }
        }
    }
    Ok(Row { items })
}

/// Appends the order-preserving encoding of one value to `out`.
pub fn encode_key_value(v: &SqlValue, out: &mut Vec<u8>) -> Result<()> {
    match v {
        SqlValue::Null => out.push(KEY_NULL),
        SqlValue::Int(i) => {
            out.push(KEY_INT);
            // Flipping the sign bit makes the big-endian bytes of a signed
            // integer sort in numeric order.
            out.extend_from_slice(&((*i as u64) ^ (1u64 << 63)).to_be_bytes());
        }
        SqlValue::Str(s) => {
            out.push(KEY_STR);
            for b in s.as_bytes() {
                if *b == 0x00 {
                    out.push(0x00);
                    out.push(0xff);
                } else {
                    out.push(*b);
                }
            }
            out.push(0x00);
            out.push(0x00);
        }
        SqlValue::Real(_) => {
            return Err(Error::internal("REAL values cannot be keys"));
        }
    }
    Ok(())
}

/// Encodes a primary-key value as a table-tree key.
pub fn encode_pk_key(v: &SqlValue) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    encode_key_value(v, &mut out)?;
    Ok(out)
}

/// Encodes an index-tree key: the indexed value followed by the primary
/// key of the row it belongs to.
pub fn encode_index_key(value: &SqlValue, pk: &SqlValue) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32);
    encode_key_value(value, &mut out)?;
    encode_key_value(pk, &mut out)?;
    Ok(out)
}

/// Decodes one key-encoded value starting at `*pos`, advancing `*pos`.
pub fn decode_key_value(buf: &[u8], pos: &mut usize) -> Result<SqlValue> {
    if *pos >= buf.len() {
        return Err(Error::corrupt("key truncated"));
    }
    let tag = buf[*pos];
    *pos += 1;
    match tag {
        KEY_NULL => Ok(SqlValue::Null),
        KEY_INT => {
            if buf.len() < *pos + 8 {
                return Err(Error::corrupt("key INT truncated"));
            }
            let raw = BigEndian::read_u64(&buf[*pos..*pos + 8]);
            *pos += 8;
            Ok(SqlValue::Int((raw ^ (1u64 << 63)) as i64))
        }
        KEY_STR => {
            let mut bytes = Vec::new();
            loop {
                if *pos >= buf.len() {
                    return Err(Error::corrupt("key STR missing terminator"));
                }
                let b = buf[*pos];
                *pos += 1;
                if b != 0x00 {
                    bytes.push(b);
                    continue;
                }
                if *pos >= buf.len() {
                    return Err(Error::corrupt("key STR escape truncated"));
                }
                let next = buf[*pos];
                *pos += 1;
                match next {
                    0x00 => break,
                    0xff => bytes.push(0x00),
                    _ => return Err(Error::corrupt("bad key STR escape")),
                }
            }
            let s = String::from_utf8(bytes)
                .map_err(|_| Error::corrupt("key STR is not UTF-8"))?;
            Ok(SqlValue::Str(s))
        }
        t => Err(Error::corrupt(format!("unknown key type tag 0x{:02x}", t))),
    }
}

/// Upper bound for all index keys whose first component equals `value`:
/// the value encoding followed by a byte larger than any key tag.
pub fn index_prefix_upper_bound(value: &SqlValue) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    encode_key_value(value, &mut out)?;
    out.push(0xff);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_value::cmp_for_sort;
    use SqlValue::*;

    fn roundtrip(items: Vec<SqlValue>) {
        let row = Row { items };
        let enc = encode_row(&row).unwrap();
        assert_eq!(decode_row(&enc).unwrap(), row);
    }

    #[test]
    fn test_row_roundtrip() {
        roundtrip(vec![]);
        roundtrip(vec![Null]);
        roundtrip(vec![Int(0), Int(i64::MIN), Int(i64::MAX)]);
        roundtrip(vec![Str(String::new()), Str("hello".into()), Null, Int(-7)]);
        roundtrip(vec![Str("naïve • résumé".into())]);
    }

    #[test]
    fn test_real_not_storable() {
        assert!(encode_row(&Row { items: vec![Real(1.5)] }).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_row(&[]).is_err());
        assert!(decode_row(&[0x00, 0x01, 0x07]).is_err());
        // STR body longer than the buffer.
        assert!(decode_row(&[0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x09, b'x']).is_err());
    }

    #[test]
    fn test_key_roundtrip() {
        for v in [
            Null,
            Int(0),
            Int(-1),
            Int(i64::MIN),
            Int(i64::MAX),
            Str("".into()),
            Str("abc".into()),
            Str("a\u{0}b".into()),
        ] {
            let enc = encode_pk_key(&v).unwrap();
            let mut pos = 0;
            assert_eq!(decode_key_value(&enc, &mut pos).unwrap(), v);
            assert_eq!(pos, enc.len());
        }
    }

    /// Encoded order must match semantic order on (NULL, INT, STR), with
    /// NULL sorting first.
    #[test]
    fn test_key_order_matches_value_order() {
        let vals = vec![
            Null,
            Int(i64::MIN),
            Int(-100),
            Int(-1),
            Int(0),
            Int(1),
            Int(99),
            Int(i64::MAX),
            Str("".into()),
            Str("A".into()),
            Str("a".into()),
            Str("a\u{0}b".into()),
            Str("aa".into()),
            Str("ab".into()),
            Str("b".into()),
        ];
        for a in &vals {
            for b in &vals {
                let ka = encode_pk_key(a).unwrap();
                let kb = encode_pk_key(b).unwrap();
                assert_eq!(
                    ka.cmp(&kb),
                    cmp_for_sort(a, b).unwrap(),
                    "key order disagrees with value order for {:?} vs {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_index_key_prefix_bounds() {
        let k1 = encode_index_key(&Str("a".into()), &Int(1)).unwrap();
        let k2 = encode_index_key(&Str("a".into()), &Int(2)).unwrap();
        let k3 = encode_index_key(&Str("ab".into()), &Int(0)).unwrap();
        let lo = encode_pk_key(&Str("a".into())).unwrap();
        let hi = index_prefix_upper_bound(&Str("a".into())).unwrap();
        assert!(lo <= k1 && k1 < k2 && k2 < hi);
        assert!(k3 > hi);
    }
}
