use binlayout::*;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use test_log::test;

fn schema_of(records: Vec<(&str, TypeDescriptor)>) -> Schema {
    Schema::new(
        records
            .into_iter()
            .map(|(n, d)| (n.to_owned(), d))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn encode(engine: &Engine, value: &Value) -> Vec<u8> {
    let mut stream = Cursor::new(Vec::new());
    engine.serialize(value, &mut stream).unwrap();
    stream.into_inner()
}

fn decode(engine: &Engine, type_name: &str, bytes: &[u8]) -> Value {
    let mut stream = Cursor::new(bytes.to_vec());
    engine.deserialize(type_name, &mut stream).unwrap()
}

fn root_cause(error: &Error) -> &Error {
    match error {
        Error::Walk { source, .. } => root_cause(source),
        other => other,
    }
}

#[test]
fn bound_length_source_tracks_the_measured_target() {
    let schema = schema_of(vec![(
        "greeting",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("name-length", DeclaredType::U8).order(0),
            MemberDescriptor::new("name", DeclaredType::Str)
                .order(1)
                .attribute(AttributeSpec::FieldLength {
                    length: "name-length".into(),
                }),
        ]),
    )]);
    let engine = Engine::new(schema);

    // The input carries a wrong length on purpose; the emitted source
    // must equal the measured octet length of the target regardless.
    let value = Value::Record(
        Record::new("greeting")
            .with("name-length", 99_u8)
            .with("name", "Alice"),
    );
    let bytes = encode(&engine, &value);
    assert_eq!(bytes, vec![0x05, 0x41, 0x6C, 0x69, 0x63, 0x65]);

    let corrected = Value::Record(
        Record::new("greeting")
            .with("name-length", 5_u8)
            .with("name", "Alice"),
    );
    assert_eq!(decode(&engine, "greeting", &bytes), corrected);
}

#[test]
fn read_only_length_bindings_enforce_and_pad() {
    let schema = schema_of(vec![(
        "fixed",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("len", DeclaredType::U8).order(0),
            MemberDescriptor::new("data", DeclaredType::Bytes)
                .order(1)
                .attribute(AttributeSpec::FieldLength {
                    length: BindingRef::new("len")
                        .direction(BindingDirection::ReadOnly)
                        .into(),
                }),
        ]),
    )]);
    let engine = Engine::new(schema);
    let value = Value::Record(
        Record::new("fixed")
            .with("len", 6_u8)
            .with("data", vec![1_u8, 2, 3]),
    );

    // No write-back: the source keeps its own value and frames the data,
    // which is padded out to the bound length.
    let bytes = encode(&engine, &value);
    assert_eq!(bytes, vec![6, 1, 2, 3, 0, 0, 0]);
}

fn png_like_schema() -> Schema {
    let mut schema = schema_of(vec![
        ("chunk-body", TypeDescriptor::new(vec![])),
        (
            "header-chunk",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("width", DeclaredType::U32).order(0),
                MemberDescriptor::new("height", DeclaredType::U32).order(1),
            ])
            .with_base("chunk-body"),
        ),
        (
            "unknown-chunk",
            TypeDescriptor::new(vec![]).with_base("chunk-body"),
        ),
        (
            "chunk",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("length", DeclaredType::U32).order(0),
                MemberDescriptor::new("chunk-type", DeclaredType::U32).order(1),
                MemberDescriptor::new("body", DeclaredType::record("chunk-body"))
                    .order(2)
                    .attribute(AttributeSpec::FieldLength {
                        length: "length".into(),
                    })
                    .attribute(AttributeSpec::Subtype {
                        path: "chunk-type".to_owned(),
                        key: Literal::UInt(1),
                        type_name: "header-chunk".to_owned(),
                        direction: BindingDirection::Both,
                    })
                    .attribute(AttributeSpec::SubtypeDefault {
                        type_name: "unknown-chunk".to_owned(),
                    }),
                MemberDescriptor::new("tail", DeclaredType::U8).order(3),
            ]),
        ),
    ]);
    schema.byte_order = ByteOrder::BigEndian;
    schema
}

#[test]
fn subtype_dispatch_with_key_write_back() {
    let engine = Engine::new(png_like_schema());
    let value = Value::Record(
        Record::new("chunk")
            .with("length", 0_u32)
            .with("chunk-type", 0_u32)
            .with(
                "body",
                Record::new("header-chunk")
                    .with("width", 2_u32)
                    .with("height", 3_u32),
            )
            .with("tail", 0xEE_u8),
    );

    let bytes = encode(&engine, &value);
    assert_eq!(
        bytes,
        vec![
            0x00, 0x00, 0x00, 0x08, // measured body length
            0x00, 0x00, 0x00, 0x01, // subtype key written back
            0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0xEE,
        ]
    );

    let corrected = Value::Record(
        Record::new("chunk")
            .with("length", 8_u32)
            .with("chunk-type", 1_u32)
            .with(
                "body",
                Record::new("header-chunk")
                    .with("width", 2_u32)
                    .with("height", 3_u32),
            )
            .with("tail", 0xEE_u8),
    );
    assert_eq!(decode(&engine, "chunk", &bytes), corrected);
}

#[test]
fn unknown_subtype_uses_default_and_skips_payload() {
    let engine = Engine::new(png_like_schema());
    let bytes = vec![
        0x00, 0x00, 0x00, 0x04, // payload length
        0x00, 0x00, 0x00, 0x09, // unmapped key
        0xDE, 0xAD, 0xBE, 0xEF, // skipped payload
        0xEE,
    ];

    let decoded = decode(&engine, "chunk", &bytes);
    let rec = decoded.as_record().unwrap();
    let body = rec.get("body").unwrap().as_record().unwrap();
    assert_eq!(body.type_name.as_str(), "unknown-chunk");
    assert_eq!(rec.get("tail"), Some(&Value::UInt(0xEE)));
}

#[test]
fn default_subtype_honors_the_caller_set_key() {
    let engine = Engine::new(png_like_schema());
    let value = Value::Record(
        Record::new("chunk")
            .with("length", 0_u32)
            .with("chunk-type", 9_u32)
            .with("body", Record::new("unknown-chunk"))
            .with("tail", 0xEE_u8),
    );

    let bytes = encode(&engine, &value);
    assert_eq!(
        bytes,
        vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xEE]
    );
}

struct KeyedFactory;

impl SubtypeFactory for KeyedFactory {
    fn try_get_type(&self, key: &Value) -> Option<String> {
        (key.as_u64() == Some(3)).then(|| "gamma".to_owned())
    }

    fn try_get_key(&self, type_name: &str) -> Option<Value> {
        (type_name == "gamma").then_some(Value::UInt(3))
    }
}

#[test]
fn subtype_factory_backs_up_the_static_table() {
    let schema = schema_of(vec![
        ("shape-base", TypeDescriptor::new(vec![])),
        (
            "gamma",
            TypeDescriptor::new(vec![MemberDescriptor::new("g", DeclaredType::U8)])
                .with_base("shape-base"),
        ),
        (
            "holder",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("tag", DeclaredType::U8).order(0),
                MemberDescriptor::new("body", DeclaredType::record("shape-base"))
                    .order(1)
                    .attribute(AttributeSpec::SubtypeFactory {
                        path: "tag".to_owned(),
                        factory: "keyed".to_owned(),
                    }),
            ]),
        ),
    ]);
    let mut registry = Registry::new();
    registry.register_factory("keyed", Arc::new(KeyedFactory));
    let engine = Engine::with_registry(schema, registry);

    let value = Value::Record(
        Record::new("holder")
            .with("tag", 0_u8)
            .with("body", Record::new("gamma").with("g", 5_u8)),
    );
    let bytes = encode(&engine, &value);
    assert_eq!(bytes, vec![3, 5]);

    let corrected = Value::Record(
        Record::new("holder")
            .with("tag", 3_u8)
            .with("body", Record::new("gamma").with("g", 5_u8)),
    );
    assert_eq!(decode(&engine, "holder", &bytes), corrected);
}

struct BomConverter;

impl ValueConverter for BomConverter {
    fn convert(
        &self,
        value: &Value,
        _parameter: Option<&Value>,
        _ctx: &ConvertContext,
    ) -> Result<Option<Value>, Error> {
        Ok(match value.as_u64() {
            Some(0xFFFE) => Some(Value::from("little")),
            Some(0xFEFF) => Some(Value::from("big")),
            _ => None,
        })
    }

    fn convert_back(
        &self,
        _value: &Value,
        _parameter: Option<&Value>,
        _ctx: &ConvertContext,
    ) -> Result<Option<Value>, Error> {
        Ok(None)
    }
}

fn bom_schema() -> (Schema, Registry) {
    let schema = schema_of(vec![(
        "message",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("length", DeclaredType::U32)
                .order(0)
                .attribute(AttributeSpec::FieldEndianness {
                    value: None,
                    binding: Some(BindingRef::converted("byte-order", "bom")),
                }),
            MemberDescriptor::new("byte-order", DeclaredType::U32).order(1),
            MemberDescriptor::new("value", DeclaredType::Str)
                .order(2)
                .attribute(AttributeSpec::FieldLength {
                    length: "length".into(),
                }),
        ]),
    )]);
    let mut registry = Registry::new();
    registry.register_converter("bom", Arc::new(BomConverter));
    (schema, registry)
}

#[test]
fn deferred_endianness_resolves_after_its_source() {
    let (schema, registry) = bom_schema();
    let engine = Engine::with_registry(schema, registry);
    let value = Value::Record(
        Record::new("message")
            .with("length", 2_u32)
            .with("byte-order", 0xFEFF_u32)
            .with("value", "Hi"),
    );

    let bytes = encode(&engine, &value);
    assert_eq!(
        bytes,
        vec![
            0x00, 0x00, 0x00, 0x02, // length, big-endian per the BOM
            0xFF, 0xFE, 0x00, 0x00, // BOM itself, schema default order
            b'H', b'i',
        ]
    );

    // Deserialization reads the length bytes before the BOM exists and
    // retro-interprets them once it does.
    assert_eq!(decode(&engine, "message", &bytes), value);
}

#[test]
fn crc16_fills_the_bound_target() {
    let schema = schema_of(vec![(
        "frame",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("len", DeclaredType::U8).order(0),
            MemberDescriptor::new("data", DeclaredType::Bytes)
                .order(1)
                .attribute(AttributeSpec::FieldLength {
                    length: "len".into(),
                })
                .attribute(AttributeSpec::FieldValue {
                    path: "crc".to_owned(),
                    function: ComputedFunction::Crc16,
                }),
            MemberDescriptor::new("crc", DeclaredType::U16).order(2),
        ]),
    )]);
    let engine = Engine::new(schema);
    let data = vec![1_u8, 2, 3];
    let mut expected_crc = crc16::State::<crc16::CCITT_FALSE>::new();
    expected_crc.update(&data);
    let expected_crc = expected_crc.get();

    let value = Value::Record(
        Record::new("frame")
            .with("len", 0_u8)
            .with("data", data.clone())
            .with("crc", 0_u16),
    );
    let bytes = encode(&engine, &value);
    assert_eq!(
        bytes,
        vec![
            3,
            1,
            2,
            3,
            (expected_crc & 0xFF) as u8,
            (expected_crc >> 8) as u8,
        ]
    );

    // Deserialization reads the computed field as an ordinary field; no
    // verification is performed.
    let decoded = decode(&engine, "frame", &bytes);
    let rec = decoded.as_record().unwrap();
    assert_eq!(rec.get("crc"), Some(&Value::UInt(u64::from(expected_crc))));
}

#[test]
fn crc32_patches_a_target_that_serialized_earlier() {
    let schema = schema_of(vec![(
        "sealed",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("crc", DeclaredType::U32).order(0),
            MemberDescriptor::new("data", DeclaredType::Bytes)
                .order(1)
                .attribute(AttributeSpec::FieldLength { length: 4.into() })
                .attribute(AttributeSpec::FieldValue {
                    path: "crc".to_owned(),
                    function: ComputedFunction::Crc32,
                }),
        ]),
    )]);
    let engine = Engine::new(schema);
    let data = vec![0xDE_u8, 0xAD, 0xBE, 0xEF];
    let expected = crc32fast::hash(&data);

    let value = Value::Record(
        Record::new("sealed")
            .with("crc", 0_u32)
            .with("data", data.clone()),
    );
    let bytes = encode(&engine, &value);
    assert_eq!(&bytes[..4], &expected.to_le_bytes()[..]);
    assert_eq!(&bytes[4..], &data[..]);
}

#[test]
fn additive_checksum_truncates_to_the_target_width() {
    let schema = schema_of(vec![(
        "ck",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("data", DeclaredType::Bytes)
                .order(0)
                .attribute(AttributeSpec::FieldLength { length: 2.into() })
                .attribute(AttributeSpec::FieldValue {
                    path: "sum".to_owned(),
                    function: ComputedFunction::Checksum,
                }),
            MemberDescriptor::new("sum", DeclaredType::U8).order(1),
        ]),
    )]);
    let engine = Engine::new(schema);
    let value = Value::Record(
        Record::new("ck")
            .with("data", vec![200_u8, 200])
            .with("sum", 0_u8),
    );

    let bytes = encode(&engine, &value);
    assert_eq!(bytes, vec![200, 200, 144]);
}

fn block_schema(mode: LastItemMode) -> Schema {
    schema_of(vec![
        (
            "block",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("kind", DeclaredType::U8).order(0),
                MemberDescriptor::new("val", DeclaredType::U8).order(1),
            ]),
        ),
        (
            "document",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("blocks", DeclaredType::list(DeclaredType::record("block")))
                    .order(0)
                    .attribute(AttributeSpec::ItemSerializeUntil {
                        path: "kind".to_owned(),
                        value: Literal::UInt(2),
                        last_item: mode,
                    }),
                MemberDescriptor::new("header", DeclaredType::record("block")).order(1),
            ]),
        ),
    ])
}

#[test]
fn until_item_defer_rewinds_for_the_next_consumer() {
    let engine = Engine::new(block_schema(LastItemMode::Defer));
    let bytes = vec![1, 10, 1, 11, 2, 99];

    let decoded = decode(&engine, "document", &bytes);
    let expected = Value::Record(
        Record::new("document")
            .with(
                "blocks",
                Value::List(vec![
                    Value::Record(Record::new("block").with("kind", 1_u8).with("val", 10_u8)),
                    Value::Record(Record::new("block").with("kind", 1_u8).with("val", 11_u8)),
                ]),
            )
            .with(
                "header",
                Record::new("block").with("kind", 2_u8).with("val", 99_u8),
            ),
    );
    assert_eq!(decoded, expected);

    // Round-trip back to the same octets.
    assert_eq!(encode(&engine, &expected), bytes);
}

#[test]
fn until_item_exclude_drops_the_sentinel() {
    let schema = schema_of(vec![
        (
            "block",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("kind", DeclaredType::U8).order(0),
                MemberDescriptor::new("val", DeclaredType::U8).order(1),
            ]),
        ),
        (
            "doc2",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("blocks", DeclaredType::list(DeclaredType::record("block")))
                    .order(0)
                    .attribute(AttributeSpec::ItemSerializeUntil {
                        path: "kind".to_owned(),
                        value: Literal::UInt(2),
                        last_item: LastItemMode::Exclude,
                    }),
                MemberDescriptor::new("tail", DeclaredType::U8).order(1),
            ]),
        ),
    ]);
    let engine = Engine::new(schema);
    let bytes = vec![1, 10, 2, 99, 0xEE];

    let decoded = decode(&engine, "doc2", &bytes);
    let rec = decoded.as_record().unwrap();
    assert_eq!(
        rec.get("blocks").unwrap().as_list().unwrap().len(),
        1,
        "sentinel item must be dropped"
    );
    assert_eq!(rec.get("tail"), Some(&Value::UInt(0xEE)));
}

#[test]
fn subtype_mappings_are_direction_aware() {
    let schema = schema_of(vec![
        ("shape-base", TypeDescriptor::new(vec![])),
        (
            "alpha",
            TypeDescriptor::new(vec![MemberDescriptor::new("a", DeclaredType::U8)])
                .with_base("shape-base"),
        ),
        (
            "beta",
            TypeDescriptor::new(vec![MemberDescriptor::new("b", DeclaredType::U8)])
                .with_base("shape-base"),
        ),
        (
            "holder",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("tag", DeclaredType::U8).order(0),
                MemberDescriptor::new("body", DeclaredType::record("shape-base"))
                    .order(1)
                    .attribute(AttributeSpec::Subtype {
                        path: "tag".to_owned(),
                        key: Literal::UInt(1),
                        type_name: "alpha".to_owned(),
                        direction: BindingDirection::WriteOnly,
                    })
                    .attribute(AttributeSpec::Subtype {
                        path: "tag".to_owned(),
                        key: Literal::UInt(1),
                        type_name: "beta".to_owned(),
                        direction: BindingDirection::ReadOnly,
                    }),
            ]),
        ),
    ]);
    let engine = Engine::new(schema);

    // A write-only mapping never hits during deserialize.
    let decoded = decode(&engine, "holder", &[1, 5]);
    let rec = decoded.as_record().unwrap();
    assert_eq!(
        rec.get("body").unwrap().as_record().unwrap().type_name.as_str(),
        "beta"
    );

    // A read-only mapping never hits during serialize.
    let value = Value::Record(
        Record::new("holder")
            .with("tag", 0_u8)
            .with("body", Record::new("alpha").with("a", 5_u8)),
    );
    assert_eq!(encode(&engine, &value), vec![1, 5]);
}

struct WordLength;

impl ValueConverter for WordLength {
    fn convert(
        &self,
        value: &Value,
        _parameter: Option<&Value>,
        _ctx: &ConvertContext,
    ) -> Result<Option<Value>, Error> {
        Ok(value.as_u64().map(|words| Value::UInt(words * 2)))
    }

    fn convert_back(
        &self,
        value: &Value,
        _parameter: Option<&Value>,
        _ctx: &ConvertContext,
    ) -> Result<Option<Value>, Error> {
        Ok(value.as_u64().map(|octets| Value::UInt(octets / 2)))
    }
}

#[test]
fn converters_run_in_both_directions() {
    let schema = schema_of(vec![(
        "wmsg",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("len", DeclaredType::U8).order(0),
            MemberDescriptor::new("data", DeclaredType::Bytes)
                .order(1)
                .attribute(AttributeSpec::FieldLength {
                    length: BindingRef::converted("len", "words").into(),
                }),
        ]),
    )]);
    let mut registry = Registry::new();
    registry.register_converter("words", Arc::new(WordLength));
    let engine = Engine::with_registry(schema, registry);

    let value = Value::Record(
        Record::new("wmsg")
            .with("len", 2_u8)
            .with("data", vec![1_u8, 2, 3, 4]),
    );
    let bytes = encode(&engine, &value);
    // Four octets of data written back as two words.
    assert_eq!(bytes, vec![2, 1, 2, 3, 4]);
    assert_eq!(decode(&engine, "wmsg", &bytes), value);
}

#[test]
fn jagged_item_lengths() {
    let schema = schema_of(vec![(
        "jag",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("lens", DeclaredType::list(DeclaredType::U8))
                .order(0)
                .attribute(AttributeSpec::FieldCount { count: 2.into() }),
            MemberDescriptor::new("words", DeclaredType::list(DeclaredType::Str))
                .order(1)
                .attribute(AttributeSpec::ItemLength {
                    length: "lens".into(),
                }),
        ]),
    )]);
    let engine = Engine::new(schema);
    let value = Value::Record(
        Record::new("jag")
            .with("lens", Value::List(vec![Value::UInt(2), Value::UInt(3)]))
            .with(
                "words",
                Value::List(vec![Value::from("ab"), Value::from("cde")]),
            ),
    );

    let bytes = encode(&engine, &value);
    assert_eq!(bytes, vec![2, 3, b'a', b'b', b'c', b'd', b'e']);
    assert_eq!(decode(&engine, "jag", &bytes), value);
}

#[test]
fn field_offset_jumps_and_continues() {
    let schema = schema_of(vec![(
        "sparse",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("a", DeclaredType::U8).order(0),
            MemberDescriptor::new("b", DeclaredType::U8)
                .order(1)
                .attribute(AttributeSpec::FieldOffset { offset: 4.into() }),
            MemberDescriptor::new("c", DeclaredType::U8).order(2),
        ]),
    )]);
    let engine = Engine::new(schema);
    let value = Value::Record(
        Record::new("sparse")
            .with("a", 0xAA_u8)
            .with("b", 0xBB_u8)
            .with("c", 0xCC_u8),
    );

    let bytes = encode(&engine, &value);
    // Siblings after the jump continue from where it left off.
    assert_eq!(bytes, vec![0xAA, 0, 0, 0, 0xBB, 0xCC]);
    assert_eq!(decode(&engine, "sparse", &bytes), value);
}

struct Doubler;

impl CustomCodec for Doubler {
    fn serialize(
        &self,
        value: &Value,
        writer: &mut binlayout::framer::FramedWriter<'_>,
        _endianness: byteordered::Endianness,
        _ctx: &ConvertContext,
    ) -> Result<(), Error> {
        let b = value.as_u64().unwrap_or_default() as u8;
        writer.write_all(&[b, b])
    }

    fn deserialize(
        &self,
        reader: &mut binlayout::framer::FramedReader<'_>,
        _endianness: byteordered::Endianness,
        _ctx: &ConvertContext,
    ) -> Result<Value, Error> {
        let mut buf = [0_u8; 2];
        reader.read_exact(&mut buf)?;
        Ok(Value::UInt(u64::from(buf[0])))
    }
}

#[test]
fn custom_codecs_stay_inside_their_bounded_overlay() {
    let schema = schema_of(vec![(
        "wrapped",
        TypeDescriptor::new(vec![
            MemberDescriptor::new(
                "c",
                DeclaredType::Custom {
                    codec: "doubler".to_owned(),
                },
            )
            .order(0)
            .attribute(AttributeSpec::FieldLength { length: 2.into() }),
            MemberDescriptor::new("tail", DeclaredType::U8).order(1),
        ]),
    )]);
    let mut registry = Registry::new();
    registry.register_codec("doubler", Arc::new(Doubler));
    let engine = Engine::with_registry(schema, registry);

    let value = Value::Record(
        Record::new("wrapped")
            .with("c", 7_u8)
            .with("tail", 0xEE_u8),
    );
    let bytes = encode(&engine, &value);
    assert_eq!(bytes, vec![7, 7, 0xEE]);
    assert_eq!(decode(&engine, "wrapped", &bytes), value);
}

#[derive(Default)]
struct Recorder {
    serialized: Mutex<Vec<String>>,
}

impl EventSink for Recorder {
    fn member_serialized(&self, event: &MemberEvent<'_>) {
        self.serialized
            .lock()
            .unwrap()
            .push(event.member_name.to_owned());
    }
}

#[test]
fn lifecycle_events_follow_declared_order() {
    let schema = schema_of(vec![(
        "pair",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("x", DeclaredType::U8).order(0),
            MemberDescriptor::new("y", DeclaredType::U8).order(1),
        ]),
    )]);
    let engine = Engine::new(schema);
    let recorder = Arc::new(Recorder::default());
    engine.subscribe(recorder.clone());

    let value = Value::Record(Record::new("pair").with("x", 1_u8).with("y", 2_u8));
    let _ = encode(&engine, &value);

    let events = recorder.serialized.lock().unwrap().clone();
    assert_eq!(events, vec!["x".to_owned(), "y".to_owned(), "pair".to_owned()]);
}

#[test]
fn duplicate_order_is_a_build_error() {
    let schema = schema_of(vec![(
        "broken",
        TypeDescriptor::new(vec![
            MemberDescriptor::new("x", DeclaredType::U8).order(0),
            MemberDescriptor::new("y", DeclaredType::U8).order(0),
        ]),
    )]);
    let engine = Engine::new(schema);
    let err = engine
        .deserialize("broken", &mut Cursor::new(Vec::new()))
        .unwrap_err();
    assert!(matches!(root_cause(&err), Error::DuplicateOrder { .. }));
}

#[test]
fn unmapped_key_without_default_is_an_error() {
    let schema = schema_of(vec![
        ("shape-base", TypeDescriptor::new(vec![])),
        (
            "alpha",
            TypeDescriptor::new(vec![MemberDescriptor::new("a", DeclaredType::U8)])
                .with_base("shape-base"),
        ),
        (
            "strict",
            TypeDescriptor::new(vec![
                MemberDescriptor::new("tag", DeclaredType::U8).order(0),
                MemberDescriptor::new("body", DeclaredType::record("shape-base"))
                    .order(1)
                    .attribute(AttributeSpec::Subtype {
                        path: "tag".to_owned(),
                        key: Literal::UInt(1),
                        type_name: "alpha".to_owned(),
                        direction: BindingDirection::Both,
                    }),
            ]),
        ),
    ]);
    let engine = Engine::new(schema);
    let err = engine
        .deserialize("strict", &mut Cursor::new(vec![9_u8, 5]))
        .unwrap_err();
    assert!(matches!(root_cause(&err), Error::UnknownSubtype(_)));
}

#[test]
fn overflowing_a_constant_length_is_an_error() {
    let schema = schema_of(vec![(
        "tight",
        TypeDescriptor::new(vec![MemberDescriptor::new("name", DeclaredType::Str)
            .attribute(AttributeSpec::FieldLength { length: 4.into() })]),
    )]);
    let engine = Engine::new(schema);
    let value = Value::Record(Record::new("tight").with("name", "overlong"));

    let err = encode_err(&engine, &value);
    assert!(matches!(root_cause(&err), Error::Overflow { natural: 8, bound: 4 }));
}

#[test]
fn field_offset_requires_a_seekable_stream() {
    let schema = schema_of(vec![(
        "sparse",
        TypeDescriptor::new(vec![MemberDescriptor::new("b", DeclaredType::U8)
            .attribute(AttributeSpec::FieldOffset { offset: 4.into() })]),
    )]);
    let engine = Engine::new(schema);
    let value = Value::Record(Record::new("sparse").with("b", 1_u8));

    let mut stream = NoSeek::new(Vec::new());
    let err = engine.serialize(&value, &mut stream).unwrap_err();
    assert!(matches!(
        root_cause(&err),
        Error::NotSeekable("field-offset")
    ));
}

#[test]
fn unresolvable_binding_paths_are_reported() {
    let schema = schema_of(vec![(
        "dangling",
        TypeDescriptor::new(vec![MemberDescriptor::new("data", DeclaredType::Bytes)
            .attribute(AttributeSpec::FieldLength {
                length: "nope".into(),
            })]),
    )]);
    let engine = Engine::new(schema);
    let err = engine
        .deserialize("dangling", &mut Cursor::new(vec![1_u8, 2]))
        .unwrap_err();
    assert!(matches!(root_cause(&err), Error::BindingNotFound(p) if p == "nope"));
}

fn encode_err(engine: &Engine, value: &Value) -> Error {
    let mut stream = Cursor::new(Vec::new());
    engine.serialize(value, &mut stream).unwrap_err()
}
