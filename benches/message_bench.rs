use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use supla_server_core::protocol::channel_value::{self, ChannelValue};
use supla_server_core::protocol::device_config::{self, DeviceConfigField};
use supla_server_core::protocol::message::{ChannelValueChangedB, AUTHKEY_SIZE};
use supla_server_core::protocol::registration::{
    ChannelDescriptor, Credential, RegisterDevice, RegistrationVariant,
};
use supla_server_core::protocol::{Dispatcher, Message};

fn gateway_registration(channels: u8) -> RegisterDevice {
    RegisterDevice {
        variant: RegistrationVariant::G,
        guid: [0x42; 16],
        name: "Bench gateway".into(),
        soft_ver: "1.0.0".into(),
        server_name: Some("bench".into()),
        credential: Credential::Email {
            email: "bench@example.com".into(),
            auth_key: [0x11; AUTHKEY_SIZE],
        },
        flags: Some(0),
        manufacturer_id: Some(1),
        product_id: Some(1),
        channels: (0..channels)
            .map(|n| ChannelDescriptor {
                sub_device_id: Some(n / 4 + 1),
                ..ChannelDescriptor::new(n, 2900)
            })
            .collect(),
    }
}

#[allow(clippy::unwrap_used)]
fn bench_message_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_codec");
    let dispatcher = Dispatcher::new();

    let registration = Message::RegisterDevice(gateway_registration(32));
    group.bench_function("encode_registration_g_32ch", |b| {
        b.iter_batched(
            || registration.clone(),
            |msg| {
                let _ = dispatcher.encode_frame(&msg, 1).unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    let frame = dispatcher.encode_frame(&registration, 1).unwrap();
    group.bench_function("decode_registration_g_32ch", |b| {
        b.iter(|| {
            let _ = dispatcher.decode_frame(&frame).unwrap();
        })
    });

    let value = dispatcher
        .encode_frame(
            &Message::ChannelValueChangedB(ChannelValueChangedB {
                channel_number: 3,
                offline: false,
                value: [1, 0, 0, 0, 0, 0, 0, 0],
            }),
            2,
        )
        .unwrap();
    group.bench_function("decode_value_changed", |b| {
        b.iter(|| {
            let Message::ChannelValueChangedB(v) = dispatcher.decode_frame(&value).unwrap() else {
                unreachable!()
            };
            let _ = channel_value::decode(2900, None, &v.value).unwrap();
        })
    });

    group.bench_function("encode_set_value", |b| {
        b.iter(|| {
            let _ = channel_value::encode(4000, None, &ChannelValue::Percent(40)).unwrap();
        })
    });

    let (mask, blob) = device_config::encode(&[
        DeviceConfigField::StatusLed(1),
        DeviceConfigField::ButtonVolume(50),
        DeviceConfigField::AutomaticTimeSync(true),
        DeviceConfigField::HomeScreenOffDelay(60),
    ])
    .unwrap();
    group.bench_function("decode_device_config", |b| {
        b.iter(|| {
            let _ = device_config::decode(mask, &blob).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_message_codec);
criterion_main!(benches);
