#[cfg(test)]
mod writer_tests {
    use std::{
        io::Cursor,
        time::{Duration, UNIX_EPOCH},
    };

    use proptest::prelude::*;

    use crate::{
        bplist::{
            models::{Dictionary, ObjectTable, PlistValue, TableEntry},
            parser::{parse, parse_table},
            writer::{flatten, serialize, serialize_table},
        },
        error::bplist::{ParseError, SerializeError},
    };

    /// The bytes of the only object in a single-object file
    fn object_bytes(bytes: &[u8]) -> &[u8] {
        let mut table_offset = [0; 8];
        table_offset.copy_from_slice(&bytes[bytes.len() - 8..]);
        &bytes[8..u64::from_be_bytes(table_offset) as usize]
    }

    fn write_one(value: PlistValue) -> Vec<u8> {
        object_bytes(&serialize(&value).unwrap()).to_vec()
    }

    #[test]
    fn can_write_minimal_file() {
        let bytes = serialize(&PlistValue::Bool(true)).unwrap();

        let mut expected = b"bplist00".to_vec();
        expected.push(0x09);
        expected.push(0x08);
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 1, 1]);
        expected.extend_from_slice(&1u64.to_be_bytes());
        expected.extend_from_slice(&0u64.to_be_bytes());
        expected.extend_from_slice(&9u64.to_be_bytes());

        assert_eq!(bytes, expected);
    }

    #[test]
    fn can_write_smallest_integer_widths() {
        assert_eq!(write_one(PlistValue::Integer(0)), vec![0x10, 0x00]);
        assert_eq!(write_one(PlistValue::Integer(255)), vec![0x10, 0xFF]);
        assert_eq!(write_one(PlistValue::Integer(256)), vec![0x11, 0x01, 0x00]);
        assert_eq!(
            write_one(PlistValue::Integer(65_536)),
            vec![0x12, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(
            write_one(PlistValue::Integer(1 << 32)),
            vec![0x13, 0, 0, 0, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn can_write_negative_integer_as_8_bytes() {
        assert_eq!(write_one(PlistValue::Integer(-1)), vec![0x13, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn can_write_reals_as_8_bytes() {
        let mut expected = vec![0x23];
        expected.extend_from_slice(&1.5f64.to_be_bytes());
        assert_eq!(write_one(PlistValue::Real(1.5)), expected);

        let mut expected = vec![0x33];
        expected.extend_from_slice(&(-3.25f64).to_be_bytes());
        assert_eq!(write_one(PlistValue::Date(-3.25)), expected);
    }

    #[test]
    fn can_choose_string_encoding() {
        assert_eq!(write_one(PlistValue::from("abc")), vec![0x53, b'a', b'b', b'c']);
        assert_eq!(write_one(PlistValue::from("é")), vec![0x61, 0x00, 0xE9]);
        assert_eq!(
            write_one(PlistValue::from("🍎")),
            vec![0x62, 0xD8, 0x3C, 0xDF, 0x4E]
        );
    }

    #[test]
    fn can_write_long_counts() {
        let mut expected = vec![0x4E];
        expected.extend_from_slice(&[7; 14]);
        assert_eq!(write_one(PlistValue::Data(vec![7; 14])), expected);

        let mut expected = vec![0x4F, 0x10, 0x0F];
        expected.extend_from_slice(&[7; 15]);
        assert_eq!(write_one(PlistValue::Data(vec![7; 15])), expected);
    }

    #[test]
    fn can_write_smallest_uid_widths() {
        assert_eq!(write_one(PlistValue::Uid(0)), vec![0x80, 0x00]);
        assert_eq!(write_one(PlistValue::Uid(256)), vec![0x81, 0x01, 0x00]);
        assert_eq!(
            write_one(PlistValue::Uid(70_000)),
            vec![0x83, 0x00, 0x01, 0x11, 0x70]
        );
    }

    #[test]
    fn can_flatten_parent_first() {
        let mut dict = Dictionary::new();
        dict.insert("a".to_string(), PlistValue::Integer(1));
        dict.insert(
            "b".to_string(),
            PlistValue::Array(vec![PlistValue::Bool(true)]),
        );

        let expected = ObjectTable {
            objects: vec![
                TableEntry::Dictionary(vec![(1, 3), (2, 4)]),
                TableEntry::String("a".to_string()),
                TableEntry::String("b".to_string()),
                TableEntry::Integer(1),
                TableEntry::Array(vec![5]),
                TableEntry::Bool(true),
            ],
            top: 0,
        };

        assert_eq!(flatten(&PlistValue::Dictionary(dict)), expected);
    }

    #[test]
    fn can_write_table_as_given() {
        let table = ObjectTable {
            objects: vec![
                TableEntry::Set(vec![1, 2]),
                TableEntry::String("x".to_string()),
                TableEntry::String("x".to_string()),
            ],
            top: 0,
        };

        let bytes = serialize_table(&table).unwrap();
        assert_eq!(parse_table(&bytes), Ok(table));
    }

    #[test]
    fn can_write_recursive_table() {
        let table = ObjectTable {
            objects: vec![TableEntry::Array(vec![0])],
            top: 0,
        };

        let bytes = serialize_table(&table).unwrap();
        assert_eq!(parse_table(&bytes), Ok(table));
        assert_eq!(parse(&bytes), Err(ParseError::RecursiveContainer(0)));
    }

    #[test]
    fn cant_write_invalid_tables() {
        assert_eq!(
            serialize_table(&ObjectTable::default()),
            Err(SerializeError::EmptyTable)
        );

        let table = ObjectTable {
            objects: vec![TableEntry::Null],
            top: 3,
        };
        assert_eq!(serialize_table(&table), Err(SerializeError::TopOutOfRange(3, 1)));

        let table = ObjectTable {
            objects: vec![TableEntry::Array(vec![5])],
            top: 0,
        };
        assert_eq!(
            serialize_table(&table),
            Err(SerializeError::DanglingReference(0, 5))
        );
    }

    #[test]
    fn can_widen_refs_and_offsets() {
        let value = PlistValue::Array((0..300).map(PlistValue::Integer).collect());
        let bytes = serialize(&value).unwrap();

        // 301 objects need 2 byte references, and the data runs past 255 bytes
        assert_eq!(bytes[bytes.len() - 32 + 6], 2);
        assert_eq!(bytes[bytes.len() - 32 + 7], 2);
        assert_eq!(parse(&bytes), Ok(value));
    }

    #[test]
    fn can_fit_refs_to_largest_index() {
        let value = PlistValue::Array(vec![PlistValue::Bool(true); 255]);
        let bytes = serialize(&value).unwrap();

        // 256 objects, but the largest index is 255
        assert_eq!(bytes[bytes.len() - 32 + 7], 1);
        assert_eq!(parse(&bytes), Ok(value));
    }

    #[test]
    fn can_be_read_by_plist_crate() {
        let mut dict = Dictionary::new();
        dict.insert("name".to_string(), PlistValue::from("Archive"));
        dict.insert("emoji".to_string(), PlistValue::from("🍎 apple"));
        dict.insert("count".to_string(), PlistValue::Integer(70_000));
        dict.insert("negative".to_string(), PlistValue::Integer(-12));
        dict.insert("ratio".to_string(), PlistValue::Real(0.25));
        dict.insert("flag".to_string(), PlistValue::Bool(true));
        dict.insert("bytes".to_string(), PlistValue::Data(vec![1, 2, 3]));
        dict.insert("uid".to_string(), PlistValue::Uid(300));
        dict.insert("date".to_string(), PlistValue::Date(60.0));
        dict.insert(
            "list".to_string(),
            PlistValue::Array(vec![PlistValue::from("Archive"), PlistValue::Integer(1)]),
        );
        let bytes = serialize(&PlistValue::Dictionary(dict)).unwrap();

        let mut expected = plist::Dictionary::new();
        expected.insert("name".to_string(), plist::Value::String("Archive".to_string()));
        expected.insert("emoji".to_string(), plist::Value::String("🍎 apple".to_string()));
        expected.insert("count".to_string(), plist::Value::Integer(70_000.into()));
        expected.insert("negative".to_string(), plist::Value::Integer((-12).into()));
        expected.insert("ratio".to_string(), plist::Value::Real(0.25));
        expected.insert("flag".to_string(), plist::Value::Boolean(true));
        expected.insert("bytes".to_string(), plist::Value::Data(vec![1, 2, 3]));
        expected.insert("uid".to_string(), plist::Value::Uid(plist::Uid::new(300)));
        expected.insert(
            "date".to_string(),
            plist::Value::Date((UNIX_EPOCH + Duration::from_secs(978_307_200 + 60)).into()),
        );
        expected.insert(
            "list".to_string(),
            plist::Value::Array(vec![
                plist::Value::String("Archive".to_string()),
                plist::Value::Integer(1.into()),
            ]),
        );

        let actual = plist::Value::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(actual, plist::Value::Dictionary(expected));
    }

    fn plist_value() -> impl Strategy<Value = PlistValue> {
        let leaf = prop_oneof![
            Just(PlistValue::Null),
            any::<bool>().prop_map(PlistValue::Bool),
            any::<i64>().prop_map(PlistValue::Integer),
            (-1.0e12..1.0e12f64).prop_map(PlistValue::Real),
            (-1.0e9..1.0e9f64).prop_map(PlistValue::Date),
            prop::collection::vec(any::<u8>(), 0..40).prop_map(PlistValue::Data),
            ".{0,24}".prop_map(PlistValue::String),
            any::<u64>().prop_map(PlistValue::Uid),
        ];

        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(PlistValue::Array),
                prop::collection::vec(inner.clone(), 0..8).prop_map(PlistValue::Set),
                prop::collection::vec((".{0,8}", inner), 0..8).prop_map(|pairs| {
                    PlistValue::Dictionary(pairs.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn can_round_trip_any_tree(value in plist_value()) {
            let bytes = serialize(&value).unwrap();
            prop_assert_eq!(parse(&bytes), Ok(value));
        }
    }
}
