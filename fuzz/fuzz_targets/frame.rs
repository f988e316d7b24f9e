#![no_main]

use libfuzzer_sys::fuzz_target;
use negstream_core::frame::{Frame, FrameReader, DEFAULT_MAX_FRAME_SIZE};

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size fed to the incremental reader.
    let Some((&step, wire)) = data.split_first() else {
        return;
    };
    let step = usize::from(step).max(1);

    let mut whole = Vec::new();
    let mut offset = 0;
    while offset < wire.len() {
        match Frame::parse(&wire[offset..], DEFAULT_MAX_FRAME_SIZE) {
            Ok((frame, used)) => {
                whole.push(frame);
                offset += used;
            }
            Err(_) => break,
        }
    }

    let mut reader = FrameReader::new(DEFAULT_MAX_FRAME_SIZE);
    let mut chunked = Vec::new();
    let mut rest = wire;
    'feed: while !rest.is_empty() {
        let want = reader.want();
        let n = want.len().min(step).min(rest.len());
        want[..n].copy_from_slice(&rest[..n]);
        rest = &rest[n..];
        match reader.advance(n) {
            Ok(Some(frame)) => chunked.push(frame),
            Ok(None) => {}
            Err(_) => break 'feed,
        }
    }

    // Both readers agree on every frame they completed.
    let common = whole.len().min(chunked.len());
    assert_eq!(whole[..common], chunked[..common]);
});
