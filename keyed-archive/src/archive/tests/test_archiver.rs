#[cfg(test)]
mod archiver_tests {
    use std::io::Cursor;

    use chrono::{DateTime, Utc};

    use crate::{
        archive::{
            archiver::{archive, Archiver},
            models::{Key, Map, Mutability, UnknownClasses, Value},
            opaque::OpaqueObject,
            registry::ClassRegistry,
            tests::fixtures::{field, init_logging, objects, registry, Foo, Tags},
            unarchiver::unarchive,
        },
        bplist::models::PlistValue,
        error::archive::ArchiveError,
        util::dates::Timestamp,
    };

    fn round_trip(value: &Value) -> Value {
        init_logging();
        let registry = registry();
        let bytes = archive(value, &registry, UnknownClasses::Reject).unwrap();
        unarchive(&bytes, &registry, UnknownClasses::Reject).unwrap()
    }

    fn assert_round_trip(value: Value) {
        assert_eq!(round_trip(&value), value);
    }

    /// Follow a UID stored in `value` to its entry in `objects`
    fn deref<'a>(objects: &'a [PlistValue], value: &PlistValue) -> &'a PlistValue {
        &objects[value.as_uid().unwrap() as usize]
    }

    fn foo(title: &str) -> Foo {
        let mut metadata = Map::new();
        metadata.insert(Key::from("key"), Value::from("value"));

        Foo {
            title: Value::from(title),
            stamp: Value::Date(Timestamp::from_apple_offset(9001.0)),
            count: Value::Integer(42),
            categories: Value::array(
                vec![Value::from("strawberries"), Value::from("dragonfruit")],
                Mutability::Immutable,
            ),
            metadata: Value::dictionary(metadata, Mutability::Immutable),
            empty: Value::Bool(false),
            recursive: Value::Null,
        }
    }

    #[test]
    fn can_round_trip_primitives() {
        assert_round_trip(Value::Bool(true));
        assert_round_trip(Value::Integer(9001));
        assert_round_trip(Value::Integer(-9001));
        assert_round_trip(Value::from("banana"));
        assert_round_trip(Value::from("🍌 banana"));
        assert_round_trip(Value::Real(2.5));
        assert_round_trip(Value::Null);
    }

    #[test]
    fn can_round_trip_core_types() {
        let mixed = vec![Value::Integer(1), Value::from("two"), Value::Real(2.5)];
        assert_round_trip(Value::array(mixed.clone(), Mutability::Immutable));
        assert_round_trip(Value::array(mixed.clone(), Mutability::Mutable));
        assert_round_trip(Value::set(mixed, Mutability::Mutable));

        let mut fruit = Map::new();
        fruit.insert(Key::from("fruit"), Value::from("kiwi"));
        fruit.insert(Key::from("veg"), Value::from("asparagus"));
        assert_round_trip(Value::dictionary(fruit, Mutability::Immutable));

        let mut data = Map::new();
        data.insert(
            Key::from("data"),
            Value::data(b"hello".to_vec(), Mutability::Immutable),
        );
        data.insert(Key::Integer(2), Value::Bool(true));
        assert_round_trip(Value::dictionary(data, Mutability::Mutable));

        assert_round_trip(Value::data(b"hello".to_vec(), Mutability::Immutable));
        assert_round_trip(Value::Date(Timestamp::from_apple_offset(0.0)));
        assert_round_trip(Value::array(
            vec![Value::Date(Timestamp::from_apple_offset(-4.0))],
            Mutability::Immutable,
        ));
    }

    #[test]
    fn can_keep_mutability() {
        for mutability in [Mutability::Mutable, Mutability::Immutable] {
            let decoded = round_trip(&Value::array(vec![], mutability));
            assert_eq!(decoded.mutability(), Some(mutability));

            let decoded = round_trip(&Value::data(vec![1, 2], mutability));
            assert_eq!(decoded.mutability(), Some(mutability));

            let decoded = round_trip(&Value::dictionary(Map::new(), mutability));
            assert_eq!(decoded.mutability(), Some(mutability));

            let decoded = round_trip(&Value::set(vec![], mutability));
            assert_eq!(decoded.mutability(), Some(mutability));
        }
    }

    #[test]
    fn can_archive_data_by_mutability() {
        let registry = registry();

        let bytes = archive(
            &Value::data(vec![0xCA, 0xFE], Mutability::Immutable),
            &registry,
            UnknownClasses::Reject,
        )
        .unwrap();
        assert_eq!(objects(&bytes)[1], PlistValue::Data(vec![0xCA, 0xFE]));

        let bytes = archive(
            &Value::data(vec![0xCA, 0xFE], Mutability::Mutable),
            &registry,
            UnknownClasses::Reject,
        )
        .unwrap();
        let objects = objects(&bytes);
        let data = &objects[1];
        assert_eq!(field(data, "NS.data"), &PlistValue::Data(vec![0xCA, 0xFE]));

        let class = deref(&objects, field(data, "$class"));
        assert_eq!(field(class, "$classname"), &PlistValue::from("NSMutableData"));
    }

    #[test]
    fn can_round_trip_custom_type() {
        let value = Value::object(foo("herp"));
        let decoded = round_trip(&value);

        let expected = value.downcast_ref::<Foo>().unwrap();
        let actual = decoded.downcast_ref::<Foo>().unwrap();
        assert_eq!(actual.title, expected.title);
        assert_eq!(actual.stamp, expected.stamp);
        assert_eq!(actual.count, expected.count);
        assert_eq!(actual.categories, expected.categories);
        assert_eq!(actual.metadata, expected.metadata);
        assert_eq!(actual.empty, expected.empty);
        assert_eq!(actual.recursive, Value::Null);
    }

    #[test]
    fn can_archive_circular_ref() {
        init_logging();
        let value = Value::object(foo("herp"));
        value.downcast_mut::<Foo>().unwrap().recursive = value.clone();

        let registry = registry();
        let bytes = archive(&value, &registry, UnknownClasses::Reject).unwrap();

        let objects = objects(&bytes);
        assert_eq!(field(&objects[1], "recurse"), &PlistValue::Uid(1));

        let decoded = unarchive(&bytes, &registry, UnknownClasses::Reject).unwrap();
        let foo = decoded.downcast_ref::<Foo>().unwrap();
        assert!(foo.recursive.same_node(&decoded));
        assert_eq!(foo.title, Value::from("herp"));
    }

    #[test]
    fn can_write_fields_inline_or_by_uid() {
        let registry = registry();
        let bytes = archive(&Value::object(foo("herp")), &registry, UnknownClasses::Reject).unwrap();
        let objects = objects(&bytes);
        let foo = &objects[1];

        assert_eq!(objects[0], PlistValue::from("$null"));
        assert_eq!(field(foo, "count"), &PlistValue::Integer(42));
        assert_eq!(field(foo, "empty"), &PlistValue::Bool(false));
        assert_eq!(field(foo, "recurse"), &PlistValue::Uid(0));
        assert_eq!(deref(&objects, field(foo, "title")), &PlistValue::from("herp"));

        let stamp = deref(&objects, field(foo, "stamp"));
        assert_eq!(field(stamp, "NS.time"), &PlistValue::Real(9001.0));

        let class = deref(&objects, field(foo, "$class"));
        assert_eq!(field(class, "$classname"), &PlistValue::from("crap.Foo"));
        assert_eq!(
            field(class, "$classes"),
            &PlistValue::Array(vec![PlistValue::from("crap.Foo")])
        );
    }

    #[test]
    fn can_preserve_identity() {
        let shared = Value::array(vec![Value::from("inner")], Mutability::Mutable);
        let twin = Value::array(vec![Value::from("inner")], Mutability::Mutable);
        let value = Value::array(
            vec![shared.clone(), shared, twin],
            Mutability::Immutable,
        );

        let registry = registry();
        let bytes = archive(&value, &registry, UnknownClasses::Reject).unwrap();
        let objects = objects(&bytes);
        let refs = field(&objects[1], "NS.objects").as_array().unwrap();
        assert_eq!(refs[0], refs[1]);
        assert_ne!(refs[0], refs[2]);

        let decoded = unarchive(&bytes, &registry, UnknownClasses::Reject).unwrap();
        let Value::Array(node) = &decoded else {
            panic!("expected an array, got {decoded:?}");
        };
        let items = node.borrow();
        assert!(items[0].same_node(&items[1]));
        assert!(!items[0].same_node(&items[2]));
        assert_eq!(items[0], items[2]);
    }

    #[test]
    fn can_archive_fields_built_while_encoding() {
        let value = Value::object(Tags {
            first: vec!["x".to_string()],
            second: vec!["y".to_string(), "z".to_string(), "w".to_string()],
        });

        let registry = registry();
        let bytes = archive(&value, &registry, UnknownClasses::Reject).unwrap();
        let objects = objects(&bytes);
        assert_ne!(field(&objects[1], "first"), field(&objects[1], "second"));

        let decoded = unarchive(&bytes, &registry, UnknownClasses::Reject).unwrap();
        let tags = decoded.downcast_ref::<Tags>().unwrap();
        assert_eq!(tags.first, ["x"]);
        assert_eq!(tags.second, ["y", "z", "w"]);
    }

    #[test]
    fn can_deduplicate_class_metadata() {
        let value = Value::array(
            vec![Value::object(foo("one")), Value::object(foo("two"))],
            Mutability::Immutable,
        );

        let bytes = archive(&value, &registry(), UnknownClasses::Reject).unwrap();
        let class_entries = objects(&bytes)
            .iter()
            .filter(|entry| {
                entry
                    .as_dictionary()
                    .and_then(|dict| dict.get("$classname"))
                    == Some(&PlistValue::from("crap.Foo"))
            })
            .count();

        assert_eq!(class_entries, 1);
    }

    #[test]
    fn can_round_trip_recursive_mutable_array() {
        let value = Value::array(vec![], Mutability::Mutable);
        if let Value::Array(node) = &value {
            node.borrow_mut().push(value.clone());
        }

        let decoded = round_trip(&value);
        let Value::Array(node) = &decoded else {
            panic!("expected an array, got {decoded:?}");
        };
        assert_eq!(node.borrow().len(), 1);
        assert!(node.borrow()[0].same_node(&decoded));
    }

    #[test]
    fn cant_round_trip_recursive_immutable_array() {
        let value = Value::array(vec![], Mutability::Immutable);
        if let Value::Array(node) = &value {
            node.borrow_mut().push(value.clone());
        }

        let registry = registry();
        let bytes = archive(&value, &registry, UnknownClasses::Reject).unwrap();
        let result = unarchive(&bytes, &registry, UnknownClasses::Reject);

        assert!(matches!(result, Err(ArchiveError::CircularReference(1))));
    }

    #[test]
    fn can_round_trip_date_to_the_microsecond() {
        let expected = DateTime::parse_from_rfc3339("2017-02-23T06:15:58.684097Z")
            .unwrap()
            .with_timezone(&Utc);

        let decoded = round_trip(&Value::Date(Timestamp::from_datetime(&expected)));
        let stamp = decoded.as_timestamp().unwrap();

        assert_eq!(stamp.to_datetime(), Some(expected));
    }

    #[test]
    fn can_archive_opaque_object() {
        let registry = ClassRegistry::new();
        let class = registry.opaque_class(["XXCustomObject", "NSObject"]);
        let value = Value::object(OpaqueObject::with_fields(
            class,
            [
                ("foo".to_string(), Value::from("abc")),
                ("bar".to_string(), Value::Integer(42)),
            ],
        ));

        let bytes = archive(&value, &registry, UnknownClasses::Opaque).unwrap();
        let objects = objects(&bytes);
        let foo = &objects[1];

        assert_eq!(deref(&objects, field(foo, "foo")), &PlistValue::from("abc"));
        assert_eq!(field(foo, "bar"), &PlistValue::Integer(42));
        assert_eq!(foo.as_dictionary().unwrap().len(), 3);

        let class = deref(&objects, field(foo, "$class"));
        assert_eq!(field(class, "$classname"), &PlistValue::from("XXCustomObject"));
        assert_eq!(
            field(class, "$classes"),
            &PlistValue::Array(vec![
                PlistValue::from("XXCustomObject"),
                PlistValue::from("NSObject")
            ])
        );

        let decoded = unarchive(&bytes, &registry, UnknownClasses::Opaque).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn cant_archive_opaque_object_strictly() {
        let registry = ClassRegistry::new();
        let class = registry.opaque_class(["XXCustomObject", "NSObject"]);
        let value = Value::object(OpaqueObject::new(class));

        let result = archive(&value, &registry, UnknownClasses::Reject);
        assert!(matches!(
            result,
            Err(ArchiveError::MissingClassMapping(classes)) if classes == vec!["XXCustomObject".to_string(), "NSObject".to_string()]
        ));
    }

    #[test]
    fn cant_archive_unregistered_native_type() {
        let value = Value::object(foo("herp"));

        for unknown in [UnknownClasses::Reject, UnknownClasses::Opaque] {
            let result = archive(&value, &ClassRegistry::new(), unknown);
            assert!(matches!(result, Err(ArchiveError::MissingClassMapping(_))));
        }
    }

    #[test]
    fn can_build_document() {
        let registry = registry();
        let document = Archiver::new(&registry, UnknownClasses::Reject)
            .into_document(&Value::from("root"))
            .unwrap();

        assert_eq!(field(&document, "$archiver"), &PlistValue::from("NSKeyedArchiver"));
        assert_eq!(field(&document, "$version"), &PlistValue::Integer(100_000));
        assert_eq!(field(field(&document, "$top"), "root"), &PlistValue::Uid(1));
        assert_eq!(
            field(&document, "$objects"),
            &PlistValue::Array(vec![PlistValue::from("$null"), PlistValue::from("root")])
        );
    }

    #[test]
    fn can_encode_null_root() {
        let registry = registry();
        let document = Archiver::new(&registry, UnknownClasses::Reject)
            .into_document(&Value::Null)
            .unwrap();

        assert_eq!(field(field(&document, "$top"), "root"), &PlistValue::Uid(0));
    }

    #[test]
    fn can_be_read_by_plist_crate() {
        let bytes = archive(&Value::object(foo("herp")), &registry(), UnknownClasses::Reject).unwrap();
        let archive = plist::Value::from_reader(Cursor::new(bytes)).unwrap();
        let archive = archive.as_dictionary().unwrap();

        assert_eq!(
            archive.get("$archiver").and_then(plist::Value::as_string),
            Some("NSKeyedArchiver")
        );
        assert_eq!(
            archive
                .get("$top")
                .and_then(plist::Value::as_dictionary)
                .and_then(|top| top.get("root")),
            Some(&plist::Value::Uid(plist::Uid::new(1)))
        );
    }
}
