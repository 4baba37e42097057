#![no_main]

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::once;
use libfuzzer_sys::fuzz_target;
use multipart_relay::FieldExtractor;
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    let data = data.to_vec();
    let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });

    let mut extractor = FieldExtractor::new(stream, "X-BOUNDARY", "file");

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async {
        loop {
            match extractor.chunk().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    })
});
