//! Fuzz target: bus frame decoding and the Slave request handler.
//!
//! Arbitrary bytes go through both decoders and then through a Slave that
//! is listening.  Nothing may panic, a decoded frame must re-encode to the
//! same leading bytes, and the Slave must always answer with a frame that
//! itself decodes.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use terrahub::adapters::hardware::HardwareAdapter;
use terrahub::bus::codec::{decode_request, decode_response, encode_request};
use terrahub::bus::{NodeIdentity, SlaveNode, MAX_PAYLOAD};
use terrahub::config::SystemConfig;
use terrahub::drivers::gpio::GpioPin;

fuzz_target!(|data: &[u8]| {
    if let Ok(req) = decode_request(data) {
        assert!(req.payload.len() <= MAX_PAYLOAD);
        let frame = encode_request(&req).expect("decoded request re-encodes");
        assert_eq!(&data[..frame.len()], frame.as_slice());
    }
    let _ = decode_response(data);

    let cfg = SystemConfig::default();
    let mut board = HardwareAdapter::from_pins(GpioPin::relay_outputs(), &cfg);
    let mut node = SlaveNode::new(&cfg, NodeIdentity::from_build(1, 0));
    node.set_upstream(true);
    let reply = node.handle_frame(data, 0, &mut board);
    if !reply.is_empty() {
        decode_response(&reply).expect("slave replies are well-formed");
    }
});
