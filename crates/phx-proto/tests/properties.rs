//! phx-proto のプロパティテスト
//!
//! ref の単調性と Envelope のエンコード/デコード整合性を任意入力で検証する。

use phx_proto::{Envelope, RefGenerator, Reference};
use proptest::prelude::*;
use serde_json::{json, Value};

proptest! {
    /// どの長さの next() 列でも ref は厳密に増加し、重複しない
    #[test]
    fn refs_strictly_increase(count in 1usize..2000) {
        let mut refs = RefGenerator::new();
        let mut previous = 0u32;
        for _ in 0..count {
            let r = refs.next();
            prop_assert!(r.raw() > previous);
            previous = r.raw();
        }
        prop_assert_eq!(refs.last(), Some(Reference(count as u32)));
    }

    /// 非空ペイロードはエンコード→デコードで topic/event/ref/payload が保たれる
    #[test]
    fn envelope_encode_decode_agree(
        topic in "[a-z]{1,12}:[0-9]{1,6}",
        event in "[a-z_]{1,16}",
        reference in 1u32..,
        value in any::<i64>(),
        label in "[ -~]{0,24}",
    ) {
        let payload = json!({"value": value, "label": label});
        let text = Envelope::encode(&topic, &event, Reference(reference), Some(&payload));
        let decoded = Envelope::decode(text.as_bytes()).unwrap();

        prop_assert_eq!(decoded.topic, topic);
        prop_assert_eq!(decoded.event, event);
        prop_assert_eq!(decoded.reference, Some(Reference(reference)));
        prop_assert_eq!(decoded.payload, payload);
    }

    /// 文字列表現の ref も数値と同じ Reference に解釈される
    #[test]
    fn string_ref_matches_numeric_ref(reference in any::<u32>()) {
        let as_string = format!(r#"{{"topic":"t","event":"phx_reply","ref":"{}"}}"#, reference);
        let as_number = format!(r#"{{"topic":"t","event":"phx_reply","ref":{}}}"#, reference);

        let a = Envelope::decode(as_string.as_bytes()).unwrap();
        let b = Envelope::decode(as_number.as_bytes()).unwrap();
        prop_assert_eq!(a.reference, b.reference);
        prop_assert_eq!(a.payload, Value::Object(Default::default()));
    }
}
