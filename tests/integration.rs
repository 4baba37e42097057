use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::{self, Stream, TryStreamExt};
use multipart_relay::{AdditionalFields, FieldDescriptor, FieldExtractor, MultipartEncoder};

fn file_descriptor() -> FieldDescriptor {
    FieldDescriptor::new("file", "100MB.bin", mime::APPLICATION_OCTET_STREAM)
}

fn chunked(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::iter(parts.into_iter().map(|part| Ok(Bytes::from_static(part))))
}

fn char_by_char(data: &str) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::iter(
        data.chars()
            .map(|ch| ch.to_string())
            .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
            .collect::<Vec<_>>(),
    )
}

async fn collect<S>(stream: S) -> multipart_relay::Result<Bytes>
where
    S: Stream<Item = multipart_relay::Result<Bytes>>,
{
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    Ok(Bytes::from(chunks.concat()))
}

#[tokio::test]
async fn test_encode_single_part_wire_format() {
    let encoder = MultipartEncoder::new(chunked(vec![b"hello ", b"world"]), "X-BOUNDARY", file_descriptor());

    let body = collect(encoder).await.unwrap();
    let expected = "--X-BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"file\"; filename=\"100MB.bin\"\r\n\
                    Content-Type: application/octet-stream\r\n\
                    \r\n\
                    hello world\r\n--X-BOUNDARY--\r\n";

    assert_eq!(&body[..], expected.as_bytes());
}

#[tokio::test]
async fn test_encode_with_additional_fields_wire_format() {
    let mut fields = AdditionalFields::new();
    fields.append("token", "abc123");

    let encoder = MultipartEncoder::new_with_fields(chunked(vec![b"data"]), "X-BOUNDARY", file_descriptor(), fields);

    let body = collect(encoder).await.unwrap();
    let expected = "--X-BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"file\"; filename=\"100MB.bin\"\r\n\
                    Content-Type: application/octet-stream\r\n\
                    \r\n\
                    data\r\n\
                    --X-BOUNDARY\r\nContent-Disposition: form-data; name=\"token\"\r\n\r\nabc123\r\n\
                    --X-BOUNDARY--\r\n";

    assert_eq!(&body[..], expected.as_bytes());

    // Exactly one closing boundary.
    let closing: &[u8] = b"--X-BOUNDARY--";
    let count = body.windows(closing.len()).filter(|w| *w == closing).count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_encoder_skips_empty_chunks() {
    let with_empties = MultipartEncoder::new(chunked(vec![b"", b"ab", b"", b"", b"cd", b""]), "X-B", file_descriptor());
    let plain = MultipartEncoder::new(chunked(vec![b"abcd"]), "X-B", file_descriptor());

    assert_eq!(collect(with_empties).await.unwrap(), collect(plain).await.unwrap());
}

#[tokio::test]
async fn test_encoder_content_type() {
    let encoder = MultipartEncoder::new(chunked(vec![b"x"]), "X-BOUNDARY", file_descriptor());

    assert_eq!(encoder.boundary(), "X-BOUNDARY");
    assert_eq!(encoder.content_type(), "multipart/form-data; boundary=X-BOUNDARY");
}

#[tokio::test]
async fn test_round_trip() {
    let payloads: Vec<Vec<&'static [u8]>> = vec![
        vec![],
        vec![b"a"],
        vec![b"hello ", b"streaming ", b"multipart ", b"world"],
        vec![b"\nstarts with newline", b"\nand again"],
        vec![b"crlf\r\n", b"\r", b"\ninside"],
    ];

    for payload in payloads {
        let expected: Vec<u8> = payload.concat();

        let encoder = MultipartEncoder::new(chunked(payload), "X-BOUNDARY", file_descriptor());
        let extractor = FieldExtractor::new(encoder, "X-BOUNDARY", "file");

        let content = extractor.bytes().await.unwrap();
        assert_eq!(&content[..], &expected[..]);
    }
}

#[tokio::test]
async fn test_round_trip_with_additional_fields() {
    let mut fields = AdditionalFields::new();
    fields.append("token", "abc123");

    let encoder = MultipartEncoder::new_with_fields(chunked(vec![b"file data"]), "X-BOUNDARY", file_descriptor(), fields);

    let extractor = FieldExtractor::new(encoder, "X-BOUNDARY", "token");
    assert_eq!(extractor.text().await.unwrap(), "abc123");
}

const THREE_FIELDS: &str = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nAAAA\r\n\
                            --X-BOUNDARY\r\nContent-Disposition: form-data; name=\"target\"; filename=\"t.bin\"\r\nContent-Type: application/octet-stream\r\n\r\nTTTT\r\n\
                            --X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\nBBBB\r\n\
                            --X-BOUNDARY--\r\n";

#[tokio::test]
async fn test_non_target_isolation() {
    let extractor = FieldExtractor::new(char_by_char(THREE_FIELDS), "X-BOUNDARY", "target");
    let content = extractor.bytes().await.unwrap();

    assert_eq!(&content[..], b"TTTT");
}

#[tokio::test]
async fn test_non_target_isolation_any_order() {
    let parts = [
        "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nAAAA\r\n",
        "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"target\"\r\n\r\nTTTT\r\n",
        "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\nBBBB\r\n",
    ];
    let orders = [[0, 1, 2], [1, 0, 2], [2, 1, 0], [0, 2, 1], [1, 2, 0], [2, 0, 1]];

    for order in &orders {
        let mut data = String::new();
        for &idx in order {
            data.push_str(parts[idx]);
        }
        data.push_str("--X-BOUNDARY--\r\n");

        let stream = stream::once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
        let extractor = FieldExtractor::new(stream, "X-BOUNDARY", "target");

        assert_eq!(extractor.text().await.unwrap(), "TTTT");
    }
}

#[tokio::test]
async fn test_chunk_boundary_independence() {
    let whole = stream::once(async { Result::<Bytes, Infallible>::Ok(Bytes::from(THREE_FIELDS)) });

    let from_whole = FieldExtractor::new(whole, "X-BOUNDARY", "target").bytes().await.unwrap();
    let from_chars = FieldExtractor::new(char_by_char(THREE_FIELDS), "X-BOUNDARY", "target")
        .bytes()
        .await
        .unwrap();

    assert_eq!(from_whole, from_chars);

    // An uneven re-chunking as a third split.
    let uneven: Vec<Bytes> = THREE_FIELDS
        .as_bytes()
        .chunks(7)
        .map(Bytes::copy_from_slice)
        .collect();
    let uneven = stream::iter(uneven.into_iter().map(Result::<Bytes, Infallible>::Ok));

    let from_uneven = FieldExtractor::new(uneven, "X-BOUNDARY", "target").bytes().await.unwrap();
    assert_eq!(from_whole, from_uneven);
}

#[tokio::test]
async fn test_absent_field_yields_empty() {
    let mut extractor = FieldExtractor::new(char_by_char(THREE_FIELDS), "X-BOUNDARY", "missing");

    assert_eq!(extractor.chunk().await.unwrap(), None);
    assert_eq!(extractor.chunk().await.unwrap(), None);
}

#[tokio::test]
async fn test_exact_field_name_match() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"file2\"\r\n\r\nwrong\r\n\
                --X-BOUNDARY\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nright\r\n\
                --X-BOUNDARY--\r\n";

    let extractor = FieldExtractor::new(char_by_char(data), "X-BOUNDARY", "file");
    assert_eq!(extractor.text().await.unwrap(), "right");
}

#[tokio::test]
async fn test_extractor_finished_idempotence() {
    let mut extractor = FieldExtractor::new(char_by_char(THREE_FIELDS), "X-BOUNDARY", "target");

    while extractor.chunk().await.unwrap().is_some() {}

    for _ in 0..3 {
        assert_eq!(extractor.chunk().await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_encoder_finished_idempotence() {
    let mut encoder = MultipartEncoder::new(chunked(vec![b"data"]), "X-BOUNDARY", file_descriptor());

    while encoder.try_next().await.unwrap().is_some() {}

    for _ in 0..3 {
        assert_eq!(encoder.try_next().await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_truncated_stream_fails() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\npartial";
    let mut extractor = FieldExtractor::new(char_by_char(data), "X-BOUNDARY", "file");

    // Bytes decoded before the truncation are still delivered.
    let mut seen = Vec::new();
    let err = loop {
        match extractor.chunk().await {
            Ok(Some(bytes)) => seen.extend_from_slice(&bytes),
            Ok(None) => panic!("truncated stream must fail"),
            Err(err) => break err,
        }
    };

    assert_eq!(err, multipart_relay::Error::IncompleteStream);
    assert_eq!(&seen[..], b"partial");

    // Terminal: the failed transform stays ended.
    assert_eq!(extractor.chunk().await.unwrap(), None);
}

#[tokio::test]
async fn test_source_failure_propagates_through_encoder() {
    let source = stream::iter(vec![
        Ok(Bytes::from_static(b"ok")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
    ]);
    let encoder = MultipartEncoder::new(source, "X-BOUNDARY", file_descriptor());

    let err = collect(encoder).await.unwrap_err();
    assert!(matches!(err, multipart_relay::Error::StreamReadFailed(_)));
}

#[tokio::test]
async fn test_source_failure_propagates_through_extractor() {
    let source = stream::iter(vec![
        Ok(Bytes::from_static(b"--X-BOUNDARY\r\n")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
    ]);
    let extractor = FieldExtractor::new(source, "X-BOUNDARY", "file");

    let err = collect(extractor).await.unwrap_err();
    assert!(matches!(err, multipart_relay::Error::StreamReadFailed(_)));
}

#[tokio::test]
async fn test_field_encode_failure_propagates() {
    let mut fields = AdditionalFields::new();
    fields.append("bad\"name", "value");

    let encoder = MultipartEncoder::new_with_fields(chunked(vec![b"data"]), "X-BOUNDARY", file_descriptor(), fields);

    let err = collect(encoder).await.unwrap_err();
    assert!(matches!(err, multipart_relay::Error::FieldEncodeFailed { .. }));
}

#[cfg(feature = "json")]
#[tokio::test]
async fn test_extract_json_field() {
    use serde::Deserialize;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Meta {
        size: u64,
    }

    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"meta\"\r\n\r\n{\"size\":42}\r\n--X-BOUNDARY--\r\n";
    let extractor = FieldExtractor::new(char_by_char(data), "X-BOUNDARY", "meta");

    assert_eq!(extractor.json::<Meta>().await.unwrap(), Meta { size: 42 });
}
