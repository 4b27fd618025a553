#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use crate::codec::{JsonCodec, PayloadCodec, RawCodec, Utf8Codec, JSON_FORMAT_V1};
    use crate::error::CodecError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u64,
        name: String,
        tags: Vec<String>,
        retry: Option<u32>,
    }

    #[test]
    fn test_json_codec_round_trips_text_records_and_bytes() {
        let text = "héllo, queue".to_string();
        let codec = JsonCodec::<String>::new();
        assert_eq!(codec.decode(&codec.encode(&text).unwrap()).unwrap(), text);

        let job = Job {
            id: 7,
            name: "reindex".to_string(),
            tags: vec!["nightly".to_string(), "search".to_string()],
            retry: None,
        };
        let codec = JsonCodec::<Job>::new();
        assert_eq!(codec.decode(&codec.encode(&job).unwrap()).unwrap(), job);

        let bytes: Vec<u8> = vec![0, 1, 2, 254, 255];
        let codec = JsonCodec::<Vec<u8>>::new();
        assert_eq!(codec.decode(&codec.encode(&bytes).unwrap()).unwrap(), bytes);
    }

    #[test]
    fn test_json_codec_writes_version_header() {
        let encoded = JsonCodec::<u32>::new().encode(&42).unwrap();
        assert_eq!(encoded[0], JSON_FORMAT_V1);
        assert_eq!(&encoded[1..], b"42");
    }

    #[test]
    fn test_json_codec_rejects_unknown_versions_and_garbage() {
        let codec = JsonCodec::<String>::new();
        assert_eq!(codec.decode(b"\x02\"x\""), Err(CodecError::UnsupportedVersion(2)));
        assert!(matches!(codec.decode(b""), Err(CodecError::Decode(_))));
        assert!(matches!(codec.decode(b"\x01{not json"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_utf8_and_raw_codecs() {
        let text = "plain text".to_string();
        assert_eq!(Utf8Codec.decode(&Utf8Codec.encode(&text).unwrap()).unwrap(), text);
        assert!(matches!(Utf8Codec.decode(&[0xff, 0xfe]), Err(CodecError::Decode(_))));

        let blob = vec![9u8, 0, 9];
        assert_eq!(RawCodec.decode(&RawCodec.encode(&blob).unwrap()).unwrap(), blob);
    }
}
