use super::*;
use byteorder::WriteBytesExt;

fn encode(entries: &[&[u8]]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.write_i32::<LittleEndian>(entries.len() as i32).unwrap();
    for entry in entries {
        bytes.write_i32::<LittleEndian>(entry.len() as i32).unwrap();
        bytes.extend_from_slice(entry);
    }
    bytes
}

#[test]
fn test_from_bytes() {
    let vocabulary = Vocabulary::from_bytes(&encode(&[b"SELECT", b" *", b"", b" FROM"])).unwrap();

    assert_eq!(vocabulary.len(), 4);
    assert_eq!(vocabulary.token_bytes(0), b"SELECT");
    assert_eq!(vocabulary.token_bytes(2), b"");
    assert_eq!(vocabulary.decode(3), " FROM");
}

#[test]
fn test_unknown_token_is_empty() {
    let vocabulary = Vocabulary::new(vec![b"a".to_vec()]);

    assert_eq!(vocabulary.token_bytes(1), b"");
    assert_eq!(vocabulary.decode(usize::MAX), "");
}

#[test]
fn test_partial_utf8_is_kept_as_bytes() {
    // "é" split across two byte-level tokens
    let vocabulary = Vocabulary::new(vec![vec![0xC3], vec![0xA9]]);

    let mut joined = vocabulary.token_bytes(0).to_vec();
    joined.extend_from_slice(vocabulary.token_bytes(1));

    assert_eq!(String::from_utf8(joined).unwrap(), "é");
    assert_eq!(vocabulary.decode(0), "\u{FFFD}");
}

#[test]
fn test_truncated_entry() {
    let mut bytes = encode(&[b"ab", b"cdef"]);
    bytes.truncate(bytes.len() - 1);

    let err = Vocabulary::from_bytes(&bytes).unwrap_err().downcast::<InferenceError>().unwrap();

    assert_eq!(err, InferenceError::TruncatedRead { what: "vocabulary entry 1".to_string(), needed: 4, available: 3 });
}

#[test]
fn test_missing_entries() {
    let mut bytes = encode(&[b"ab"]);
    bytes[0] = 3;

    let err = Vocabulary::from_bytes(&bytes).unwrap_err().downcast::<InferenceError>().unwrap();

    assert!(matches!(err, InferenceError::TruncatedRead { what, .. } if what == "length of vocabulary entry 1"));
}

#[test]
fn test_empty_file() {
    let err = Vocabulary::from_bytes(&[]).unwrap_err().downcast::<InferenceError>().unwrap();
    assert!(matches!(err, InferenceError::TruncatedRead { needed: 4, available: 0, .. }));
}

#[test]
fn test_negative_length_rejected() {
    let mut bytes = Vec::new();
    bytes.write_i32::<LittleEndian>(1).unwrap();
    bytes.write_i32::<LittleEndian>(-5).unwrap();

    assert!(Vocabulary::from_bytes(&bytes).is_err());
}

#[test]
fn test_missing_file() {
    let err = Vocabulary::from_file("/definitely/not/here/tokenizer.bin")
        .unwrap_err()
        .downcast::<InferenceError>()
        .unwrap();

    assert_eq!(err, InferenceError::MissingFile { path: "/definitely/not/here/tokenizer.bin".to_string() });
}
