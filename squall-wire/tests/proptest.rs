use proptest::prelude::*;
use squall_wire::{BitBuffer, FrameHeader};

proptest! {
    #[test]
    fn test_var_u64_roundtrip(value in any::<u64>()) {
        let mut buf = BitBuffer::new();
        buf.write_var_u64(value);
        prop_assert_eq!(buf.read_var_u64().unwrap(), value);
    }

    #[test]
    fn test_var_i64_roundtrip(value in any::<i64>()) {
        let mut buf = BitBuffer::new();
        buf.write_var_i64(value);
        prop_assert_eq!(buf.read_var_i64().unwrap(), value);
    }

    #[test]
    fn test_unaligned_primitive_roundtrip(
        lead_bits in 0usize..8,
        a in any::<u32>(),
        b in any::<u64>(),
        c in any::<f64>(),
    ) {
        let mut buf = BitBuffer::new();
        for i in 0..lead_bits {
            buf.write_bool(i % 2 == 0);
        }
        buf.write_u32(a);
        buf.write_u64(b);
        buf.write_f64(c);

        for i in 0..lead_bits {
            prop_assert_eq!(buf.read_bool().unwrap(), i % 2 == 0);
        }
        prop_assert_eq!(buf.read_u32().unwrap(), a);
        prop_assert_eq!(buf.read_u64().unwrap(), b);
        prop_assert_eq!(buf.read_f64().unwrap().to_bits(), c.to_bits());
    }

    #[test]
    fn test_bytes_roundtrip(data in prop::collection::vec(any::<u8>(), 0..512), offset in 0usize..8) {
        let mut buf = BitBuffer::new();
        for _ in 0..offset {
            buf.write_bool(true);
        }
        buf.write_bytes_prefixed(&data);
        for _ in 0..offset {
            buf.read_bool().unwrap();
        }
        prop_assert_eq!(buf.read_bytes_prefixed().unwrap(), data);
    }

    #[test]
    fn test_header_roundtrip(kind in any::<u8>(), seq in 0u16..0x8000, frag in any::<bool>(), bits in any::<u16>()) {
        let header = FrameHeader { kind, sequence: seq, fragment: frag, payload_bits: bits };
        let mut out = Vec::new();
        header.encode(&mut out);
        prop_assert_eq!(FrameHeader::decode(&out).unwrap(), header);
    }
}
