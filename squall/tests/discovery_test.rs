use squall::discovery::decode_response;
use squall_wire::BitBuffer;

#[test]
fn test_census_roundtrip() {
    // Mirror of the transport's response layout: two varints then the blob.
    let mut buf = BitBuffer::new();
    buf.write_var_u32(5);
    buf.write_var_u32(32);
    buf.write_bytes(b"game lobby 3");

    let census = decode_response(buf.as_bytes()).unwrap();
    assert_eq!(census.connections, 5);
    assert_eq!(census.capacity, 32);
    assert_eq!(census.payload, b"game lobby 3");
}

#[test]
fn test_empty_blob() {
    let mut buf = BitBuffer::new();
    buf.write_var_u32(0);
    buf.write_var_u32(8);
    let census = decode_response(buf.as_bytes()).unwrap();
    assert!(census.payload.is_empty());
}

#[test]
fn test_truncated_census_rejected() {
    assert!(decode_response(&[]).is_err());
}
