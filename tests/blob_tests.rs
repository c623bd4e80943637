use kickoff::blob::{BlobError, BlobReader, BlobWriter};

#[test]
fn test_primitive_round_trip() {
    let mut writer = BlobWriter::new();
    writer.put_u8(0xab);
    writer.put_u32(0xdead_beef);
    writer.put_u64(0x0123_4567_89ab_cdef);
    writer.put_i64(-42);
    writer.put_bool(true);
    writer.put_bool(false);

    let bytes = writer.into_bytes();
    let mut reader = BlobReader::new(&bytes);
    assert_eq!(reader.read_u8(), Ok(0xab));
    assert_eq!(reader.read_u32(), Ok(0xdead_beef));
    assert_eq!(reader.read_u64(), Ok(0x0123_4567_89ab_cdef));
    assert_eq!(reader.read_i64(), Ok(-42));
    assert_eq!(reader.read_bool(), Ok(true));
    assert_eq!(reader.read_bool(), Ok(false));
    assert!(!reader.has_more());
}

#[test]
fn test_integers_are_little_endian() {
    let mut writer = BlobWriter::new();
    writer.put_u32(0x0102_0304);
    assert_eq!(writer.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_string_round_trip() {
    for value in ["", "hello", "tag-with-ümläuts", "multi word tag"] {
        let mut writer = BlobWriter::new();
        writer.put_str(value);
        let bytes = writer.into_bytes();
        let mut reader = BlobReader::new(&bytes);
        assert_eq!(reader.read_string().unwrap(), value);
        assert!(!reader.has_more());
    }
}

#[test]
fn test_string_layout_is_u32_length_prefixed() {
    let mut writer = BlobWriter::new();
    writer.put_str("abc");
    assert_eq!(writer.as_bytes(), &[3, 0, 0, 0, b'a', b'b', b'c']);
}

#[test]
fn test_str_seq_round_trip() {
    let values = vec!["CPU".to_string(), "GPU".to_string(), "".to_string()];
    let mut writer = BlobWriter::new();
    writer.put_str_seq(&values);
    let bytes = writer.into_bytes();
    let mut reader = BlobReader::new(&bytes);
    assert_eq!(reader.read_str_seq().unwrap(), values);
    assert!(!reader.has_more());

    let mut writer = BlobWriter::new();
    writer.put_str_seq(&[]);
    let bytes = writer.into_bytes();
    let mut reader = BlobReader::new(&bytes);
    assert_eq!(reader.read_str_seq().unwrap(), Vec::<String>::new());
}

#[test]
fn test_bool_rejects_other_bytes() {
    let mut reader = BlobReader::new(&[2]);
    assert_eq!(reader.read_bool(), Err(BlobError::InvalidBool(2)));
}

#[test]
fn test_truncated_reads_fail() {
    assert_eq!(BlobReader::new(&[]).read_u8(), Err(BlobError::UnexpectedEnd));
    assert_eq!(
        BlobReader::new(&[1, 2, 3]).read_u32(),
        Err(BlobError::UnexpectedEnd)
    );
    assert_eq!(
        BlobReader::new(&[0; 7]).read_u64(),
        Err(BlobError::UnexpectedEnd)
    );
    assert_eq!(
        BlobReader::new(&[0; 7]).read_i64(),
        Err(BlobError::UnexpectedEnd)
    );
}

#[test]
fn test_string_with_short_payload_fails() {
    // Declared length of 100 but no payload behind it.
    let mut writer = BlobWriter::new();
    writer.put_u32(100);
    let bytes = writer.into_bytes();
    let mut reader = BlobReader::new(&bytes);
    assert_eq!(reader.read_string(), Err(BlobError::UnexpectedEnd));
}

#[test]
fn test_string_with_invalid_utf8_fails() {
    let mut writer = BlobWriter::new();
    writer.put_u32(1);
    writer.put_u8(0xff);
    let bytes = writer.into_bytes();
    let mut reader = BlobReader::new(&bytes);
    assert_eq!(reader.read_string(), Err(BlobError::InvalidUtf8));
}

#[test]
fn test_failed_read_leaves_no_partial_consumption_visible() {
    // A reader that fails mid-sequence reports the failure for every
    // subsequent composite read; the request as a whole is rejected.
    let mut writer = BlobWriter::new();
    writer.put_u64(2);
    writer.put_str("only-one");
    let bytes = writer.into_bytes();
    let mut reader = BlobReader::new(&bytes);
    assert_eq!(reader.read_str_seq(), Err(BlobError::UnexpectedEnd));
}
