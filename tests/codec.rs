//! Bit stream codec tests: round trips, bit order, arrays, end of data, strings.

use binblock::codec::{ArrayLimit, BitOrder, BitReader, BitWriter, Endianness, StreamError};

fn write_with(order: BitOrder, f: impl FnOnce(&mut BitWriter<Vec<u8>>)) -> Vec<u8> {
    let mut w = BitWriter::new(Vec::new(), order);
    f(&mut w);
    w.into_inner().expect("flush")
}

// ==================== Round trips ====================

#[test]
fn primitive_round_trip_both_byte_orders() {
    for order in [Endianness::Big, Endianness::Little] {
        let bytes = write_with(BitOrder::Lsb0, |w| {
            w.write_u8(0xFE).unwrap();
            w.write_i8(-5).unwrap();
            w.write_bool(true).unwrap();
            w.write_u16(0xBEEF, order).unwrap();
            w.write_i16(-1234, order).unwrap();
            w.write_u32(0xDEAD_BEEF, order).unwrap();
            w.write_i32(i32::MIN, order).unwrap();
            w.write_u64(0x0102_0304_0506_0708, order).unwrap();
            w.write_i64(-42, order).unwrap();
            w.write_f32(3.5, order).unwrap();
            w.write_f64(-0.125, order).unwrap();
        });
        let mut r = BitReader::new(&bytes[..], BitOrder::Lsb0);
        assert_eq!(r.read_u8().unwrap(), 0xFE);
        assert_eq!(r.read_i8().unwrap(), -5);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u16(order).unwrap(), 0xBEEF);
        assert_eq!(r.read_i16(order).unwrap(), -1234);
        assert_eq!(r.read_u32(order).unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_i32(order).unwrap(), i32::MIN);
        assert_eq!(r.read_u64(order).unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.read_i64(order).unwrap(), -42);
        assert_eq!(r.read_f32(order).unwrap(), 3.5);
        assert_eq!(r.read_f64(order).unwrap(), -0.125);
        assert!(!r.has_available_data().unwrap());
        assert_eq!(r.counter(), bytes.len() as u64);
    }
}

#[test]
fn byte_order_layout() {
    let big = write_with(BitOrder::Lsb0, |w| w.write_u32(0x0102_0304, Endianness::Big).unwrap());
    let little = write_with(BitOrder::Lsb0, |w| w.write_u32(0x0102_0304, Endianness::Little).unwrap());
    assert_eq!(big, vec![1, 2, 3, 4]);
    assert_eq!(little, vec![4, 3, 2, 1]);
}

#[test]
fn bit_sequences_round_trip_for_every_width() {
    for n in 1..=8u32 {
        let max = ((1u32 << n) - 1) as u8;
        for k in [1usize, 3, 7, 8, 13] {
            let values: Vec<u8> = (0..k).map(|i| ((i as u32 * 37 + 11) as u8) & max).collect();
            for order in [BitOrder::Lsb0, BitOrder::Msb0] {
                let bytes = write_with(order, |w| {
                    for &v in &values {
                        w.write_bits(n, v).unwrap();
                    }
                });
                assert_eq!(bytes.len(), (n as usize * k).div_ceil(8));
                let mut r = BitReader::new(&bytes[..], order);
                let read: Vec<u8> = (0..k).map(|_| r.read_bits(n).unwrap()).collect();
                assert_eq!(read, values, "width {n}, count {k}, {order:?}");
            }
        }
    }
}

#[test]
fn whole_stream_bits_round_trip_for_any_count() {
    for n in 1..=8u32 {
        let max = ((1u32 << n) - 1) as u8;
        for k in 1..=17usize {
            let values: Vec<u8> = (0..k).map(|i| ((i as u32 * 53 + 7) as u8) & max).collect();
            let bytes = write_with(BitOrder::Lsb0, |w| {
                for &v in &values {
                    w.write_bits(n, v).unwrap();
                }
            });
            let mut r = BitReader::new(&bytes[..], BitOrder::Lsb0);
            let read = r.read_bits_array(n, None, ArrayLimit::Unlimited).unwrap();
            assert_eq!(read.len(), (bytes.len() * 8).div_ceil(n as usize), "width {n}, count {k}");
            assert_eq!(&read[..k], &values[..], "width {n}, count {k}");
            assert!(read[k..].iter().all(|&pad| pad == 0));
        }
    }
}

#[test]
fn whole_stream_bits_keep_partial_tail() {
    let data = [0xABu8];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    assert_eq!(
        r.read_bits_array(3, None, ArrayLimit::Unlimited).unwrap(),
        vec![0b011, 0b101, 0b10]
    );
    assert_eq!(r.counter(), 1);
    assert!(!r.has_available_data().unwrap());

    let mut fixed = BitReader::new(&data[..], BitOrder::Lsb0);
    assert!(fixed.read_bits_array(3, Some(3), ArrayLimit::Unlimited).unwrap_err().is_end_of_data());
}

#[test]
fn bits_are_taken_least_significant_first() {
    let data = [0b1011_0101u8];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    assert_eq!(r.read_bits(3).unwrap(), 0b101);
    assert_eq!(r.read_bits(5).unwrap(), 0b10110);
}

#[test]
fn msb0_reverses_each_byte() {
    for b in [0x00u8, 0x01, 0x80, 0xA5, 0x3C, 0xFF, 0x12] {
        let buf = [b];
        let mut lsb = BitReader::new(&buf[..], BitOrder::Lsb0);
        let mut msb = BitReader::new(&buf[..], BitOrder::Msb0);
        assert_eq!(msb.read_u8().unwrap(), lsb.read_u8().unwrap().reverse_bits());
    }
    let mut r = BitReader::new(&[0b1000_0000u8][..], BitOrder::Msb0);
    assert_eq!(r.read_bits(1).unwrap(), 1);
}

#[test]
fn bit_count_out_of_range_rejected() {
    let mut r = BitReader::new(&[0u8; 2][..], BitOrder::Lsb0);
    assert!(matches!(r.read_bits(0), Err(StreamError::InvalidBitCount(0))));
    assert!(matches!(r.read_bits(9), Err(StreamError::InvalidBitCount(9))));
    let mut w = BitWriter::new(Vec::new(), BitOrder::Lsb0);
    assert!(matches!(w.write_bits(9, 1), Err(StreamError::InvalidBitCount(9))));
}

// ==================== End of data ====================

#[test]
fn short_scalar_is_end_of_data() {
    let mut r = BitReader::new(&[1u8][..], BitOrder::Lsb0);
    let err = r.read_u16(Endianness::Big).unwrap_err();
    assert!(err.is_end_of_data());
}

#[test]
fn fixed_array_reports_items_read() {
    let data = [0u8, 1, 0, 2, 0];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    match r.read_u16_array(Endianness::Big, Some(3), ArrayLimit::Unlimited) {
        Err(StreamError::EndOfData { requested, read }) => {
            assert_eq!(requested, 3);
            assert_eq!(read, 2);
        }
        other => panic!("expected end of data, got {:?}", other),
    }
}

// ==================== Whole-stream arrays ====================

#[test]
fn whole_stream_array_reads_everything() {
    let data: Vec<u8> = (0..=255).collect();
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    let all = r.read_u8_array(None, ArrayLimit::Unlimited).unwrap();
    assert_eq!(all, data);
    assert_eq!(r.counter(), 256);
}

#[test]
fn whole_stream_array_of_ints_little_endian() {
    let data = [1u8, 0, 0, 0, 2, 0, 0, 0];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    assert_eq!(
        r.read_i32_array(Endianness::Little, None, ArrayLimit::Unlimited).unwrap(),
        vec![1, 2]
    );
}

#[test]
fn whole_stream_array_truncates_at_limit() {
    let data = [1u8, 2, 3, 4, 5];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    assert_eq!(r.read_u8_array(None, ArrayLimit::Truncate(3)).unwrap(), vec![1, 2, 3]);
    assert!(r.has_available_data().unwrap());
    assert_eq!(r.read_u8().unwrap(), 4);
}

#[test]
fn whole_stream_array_fails_past_limit() {
    let data = [1u8, 2, 3, 4, 5];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    assert!(matches!(
        r.read_u8_array(None, ArrayLimit::Fail(3)),
        Err(StreamError::ArrayLimitExceeded { limit: 3 })
    ));
    let mut exact = BitReader::new(&data[..], BitOrder::Lsb0);
    assert_eq!(exact.read_u8_array(None, ArrayLimit::Fail(5)).unwrap().len(), 5);
}

#[test]
fn whole_stream_bits_stop_at_end() {
    let data = [0xFFu8, 0x0F];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    let bits = r.read_bits_array(4, None, ArrayLimit::Unlimited).unwrap();
    assert_eq!(bits, vec![0xF, 0xF, 0xF, 0x0]);
}

// ==================== Counter, align, skip ====================

#[test]
fn counter_reset_is_independent_of_bit_buffer() {
    let data = [0xFFu8, 0xFF, 0xFF];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    r.read_u8().unwrap();
    r.read_bits(4).unwrap();
    r.reset_counter();
    assert_eq!(r.counter(), 0);
    r.read_bits(4).unwrap();
    assert_eq!(r.counter(), 1);
}

#[test]
fn align_pads_to_multiple() {
    let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    r.read_bits(3).unwrap();
    r.align(4).unwrap();
    assert_eq!(r.counter(), 4);
    assert_eq!(r.read_u8().unwrap(), 5);
}

#[test]
fn skip_reports_actual_count() {
    let data = [1u8, 2, 3];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    assert_eq!(r.skip(2).unwrap(), 2);
    assert_eq!(r.read_u8().unwrap(), 3);
    assert_eq!(r.skip(10).unwrap(), 0);
}

#[test]
fn skip_unaligned_consumes_bits() {
    let data = [0xF0u8, 0x0F, 0xAB];
    let mut r = BitReader::new(&data[..], BitOrder::Lsb0);
    r.read_bits(4).unwrap();
    assert_eq!(r.skip(1).unwrap(), 1);
    assert_eq!(r.read_bits(4).unwrap(), 0x0);
    assert_eq!(r.read_u8().unwrap(), 0xAB);
}

#[test]
fn writer_flush_pads_with_zeros() {
    let bytes = write_with(BitOrder::Lsb0, |w| w.write_bits(3, 0b101).unwrap());
    assert_eq!(bytes, vec![0b0000_0101]);
    let msb = write_with(BitOrder::Msb0, |w| w.write_bits(3, 0b101).unwrap());
    assert_eq!(msb, vec![0b1010_0000]);
}

#[test]
fn writer_align_counts_bytes() {
    let mut w = BitWriter::new(Vec::new(), BitOrder::Lsb0);
    w.write_u8(1).unwrap();
    w.align(4).unwrap();
    assert_eq!(w.counter(), 4);
    assert_eq!(w.into_inner().unwrap(), vec![1, 0, 0, 0]);
}

// ==================== Strings ====================

#[test]
fn strings_round_trip() {
    let long: String = "x".repeat(300);
    for order in [Endianness::Big, Endianness::Little] {
        let bytes = write_with(BitOrder::Lsb0, |w| {
            w.write_string(Some("hello"), order).unwrap();
            w.write_string(None, order).unwrap();
            w.write_string(Some(""), order).unwrap();
            w.write_string(Some(&long), order).unwrap();
            w.write_string(Some("žluť"), order).unwrap();
        });
        let mut r = BitReader::new(&bytes[..], BitOrder::Lsb0);
        assert_eq!(r.read_string(order).unwrap().as_deref(), Some("hello"));
        assert_eq!(r.read_string(order).unwrap(), None);
        assert_eq!(r.read_string(order).unwrap().as_deref(), Some(""));
        assert_eq!(r.read_string(order).unwrap().as_deref(), Some(long.as_str()));
        assert_eq!(r.read_string(order).unwrap().as_deref(), Some("žluť"));
    }
}

#[test]
fn string_prefix_layout() {
    let bytes = write_with(BitOrder::Lsb0, |w| w.write_string(Some("ab"), Endianness::Big).unwrap());
    assert_eq!(bytes, vec![2, b'a', b'b']);
    let long = "y".repeat(0x100);
    let bytes = write_with(BitOrder::Lsb0, |w| w.write_string(Some(&long), Endianness::Little).unwrap());
    assert_eq!(&bytes[..3], &[0x82, 0x00, 0x01]);
}

#[test]
fn bad_string_prefix() {
    let mut r = BitReader::new(&[0x85u8, 0][..], BitOrder::Lsb0);
    assert!(matches!(r.read_string(Endianness::Big), Err(StreamError::InvalidStringPrefix(0x85))));
}
