//! Fuzz target for envelope decoding.
//!
//! Every input line read from stdin goes through `RawEnvelope::decode` and
//! then `into_envelope`; neither may panic, and anything that decodes must
//! re-encode to a line that decodes to the same envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ringcast::{Envelope, Error, RawEnvelope};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = RawEnvelope::decode(data) else {
        let _ = RawEnvelope::return_address(data);
        return;
    };

    // Correlation fields are readable before the body is typed.
    let _ = raw.msg_id();
    let _ = raw.in_reply_to();
    let kind = raw.kind().map(str::to_owned);

    match raw.into_envelope() {
        Ok(envelope) => {
            assert_eq!(Some(envelope.body.body.kind()), kind.as_deref());

            let line = envelope.encode().expect("decoded envelope must encode");
            assert_eq!(line.last(), Some(&b'\n'));
            let again = Envelope::decode(&line[..line.len() - 1]).expect("re-encoded line must decode");
            assert_eq!(again, envelope);
        }
        Err(Error::Decode(_)) => assert!(kind.is_none()),
        Err(Error::NotSupported(got)) => assert_eq!(Some(got), kind),
        Err(Error::MalformedPayload { kind: got, .. }) => assert_eq!(Some(got), kind),
        Err(other) => panic!("unexpected error kind: {other}"),
    }
});
