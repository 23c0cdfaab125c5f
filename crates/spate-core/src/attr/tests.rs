//! Unit tests for attribute keys, maps, and the rebind registry.

use super::{display_codec, register_key, Attr, AttrError, AttributeMap};

static RETRY_COUNT: Attr<u32> = Attr::with_codec("test.retry_count", Some(3), display_codec());
static LABEL: Attr<String> = Attr::with_codec("test.label", None, display_codec());
static SCALE: Attr<f64> = Attr::with_codec("test.scale", Some(0.5), display_codec());
static OPAQUE: Attr<Vec<u8>> = Attr::new("test.opaque", None);

#[test]
fn test_default_fallback() {
    let map = AttributeMap::new();
    assert_eq!(map.get(&RETRY_COUNT), None);
    assert_eq!(map.value(&RETRY_COUNT), Some(3));
    assert_eq!(map.value(&LABEL), None);
}

#[test]
fn test_put_and_get() {
    let mut map = AttributeMap::new();
    map.put(&RETRY_COUNT, 7);
    map.put(&LABEL, "ingest".to_string());
    assert_eq!(map.get(&RETRY_COUNT), Some(7));
    assert_eq!(map.value(&RETRY_COUNT), Some(7));
    assert_eq!(map.get(&LABEL), Some("ingest".to_string()));
    assert!(map.contains(&RETRY_COUNT));
    assert!(!map.contains(&SCALE));
    assert_eq!(map.len(), 2);
}

#[test]
fn test_replace_keeps_position() {
    let mut map = AttributeMap::new();
    map.put(&RETRY_COUNT, 1);
    map.put(&LABEL, "a".to_string());
    map.put(&RETRY_COUNT, 2);

    let encoded = map.encoded_entries();
    assert_eq!(
        encoded,
        vec![
            ("test.retry_count".to_string(), "2".to_string()),
            ("test.label".to_string(), "a".to_string()),
        ]
    );
}

#[test]
fn test_codecless_entries_dropped_from_encoding() {
    let mut map = AttributeMap::new();
    map.put(&OPAQUE, vec![1, 2, 3]);
    map.put(&RETRY_COUNT, 9);
    assert_eq!(
        map.encoded_entries(),
        vec![("test.retry_count".to_string(), "9".to_string())]
    );
}

#[test]
fn test_decode_rebinds_registered_key() {
    register_key(&RETRY_COUNT);
    register_key(&SCALE);

    let mut map = AttributeMap::new();
    map.decode_and_put("test.retry_count", "42").unwrap();
    map.decode_and_put("test.scale", "0.25").unwrap();
    assert_eq!(map.get(&RETRY_COUNT), Some(42));
    assert_eq!(map.get(&SCALE), Some(0.25));
}

#[test]
fn test_decode_unknown_token() {
    let mut map = AttributeMap::new();
    let err = map.decode_and_put("test.never_registered", "1").unwrap_err();
    assert!(matches!(err, AttrError::UnknownToken(_)));
}

#[test]
fn test_decode_bad_value() {
    register_key(&RETRY_COUNT);
    let mut map = AttributeMap::new();
    let err = map.decode_and_put("test.retry_count", "not-a-number").unwrap_err();
    assert!(matches!(err, AttrError::Decode { .. }));
}

#[test]
fn test_key_identity_is_token() {
    static ALIAS: Attr<u32> = Attr::new("test.retry_count", None);
    assert_eq!(ALIAS, RETRY_COUNT);

    let mut map = AttributeMap::new();
    map.put(&ALIAS, 5);
    assert_eq!(map.get(&RETRY_COUNT), Some(5));
}

#[test]
fn test_clone_is_deep() {
    let mut map = AttributeMap::new();
    map.put(&LABEL, "one".to_string());
    let snapshot = map.clone();
    map.put(&LABEL, "two".to_string());
    assert_eq!(snapshot.get(&LABEL), Some("one".to_string()));
    assert_eq!(map.get(&LABEL), Some("two".to_string()));
}
