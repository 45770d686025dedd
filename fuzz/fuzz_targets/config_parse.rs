//! Fuzz target for configuration parsing.
//!
//! Feeds arbitrary strategy names and JSON documents through the parsers the
//! binary and embedders use.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ringcast::{NodeConfig, Strategy};
use std::time::Duration;

#[derive(Debug, Arbitrary)]
struct FuzzConfig<'a> {
    strategy: &'a str,
    sync_interval_ms: u32,
    rpc_timeout_ms: u32,
    json: &'a [u8],
}

fuzz_target!(|input: FuzzConfig<'_>| {
    if let Ok(strategy) = input.strategy.parse::<Strategy>() {
        // Display output parses back to the same strategy.
        assert_eq!(strategy.to_string().parse::<Strategy>(), Ok(strategy));

        let config = NodeConfig::new()
            .with_strategy(strategy)
            .with_sync_interval(Duration::from_millis(input.sync_interval_ms as u64))
            .with_rpc_timeout(Duration::from_millis(input.rpc_timeout_ms as u64));

        let json = serde_json::to_vec(&config).expect("config must serialize");
        let back: NodeConfig = serde_json::from_slice(&json).expect("config must deserialize");
        assert_eq!(back, config);
    }

    let _ = serde_json::from_slice::<NodeConfig>(input.json);
});
