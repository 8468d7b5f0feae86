#![no_main]

use libfuzzer_sys::fuzz_target;
use supla_server_core::protocol::call_type::CallType;
use supla_server_core::protocol::device_config;
use supla_server_core::protocol::Dispatcher;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let call_type = CallType::ALL[usize::from(selector) % CallType::ALL.len()];
    let _ = Dispatcher::new().decode(call_type.id(), payload);

    if payload.len() >= 8 {
        let mut mask = [0u8; 8];
        mask.copy_from_slice(&payload[..8]);
        let _ = device_config::decode(u64::from_le_bytes(mask), &payload[8..]);
    }
});
