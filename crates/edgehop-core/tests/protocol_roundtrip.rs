//! End-to-end protocol tests: typed messages through the framed stream.
//!
//! These exercise the public API the connection actors use — encode a
//! [`Message`], frame it over a duplex pipe, read it back, and parse —
//! covering the codec, the framing layer, and the message table together.

use edgehop_core::clipboard::{chunk_clipboard, ChunkAssembler, ClipboardData, ClipboardId};
use edgehop_core::protocol::{
    Message, PacketStream, ProtocolVersion, ScreenInfo, PROTOCOL_VERSION,
};

async fn pipe() -> (
    PacketStream<tokio::io::DuplexStream>,
    PacketStream<tokio::io::DuplexStream>,
) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (PacketStream::new(a), PacketStream::new(b))
}

async fn send(
    stream: &mut PacketStream<tokio::io::DuplexStream>,
    message: &Message,
    version: ProtocolVersion,
) {
    let payload = message.encode(version).expect("encode failed");
    stream.write_message(&payload).await.expect("write failed");
}

async fn receive(
    stream: &mut PacketStream<tokio::io::DuplexStream>,
    version: ProtocolVersion,
) -> Message {
    let frame = stream
        .read_message()
        .await
        .expect("read failed")
        .expect("stream closed");
    Message::parse(&frame, version).expect("parse failed")
}

#[tokio::test]
async fn test_every_message_survives_the_framed_stream() {
    let messages = vec![
        Message::Hello {
            version: PROTOCOL_VERSION,
        },
        Message::HelloBack {
            version: PROTOCOL_VERSION,
            name: "laptop".to_string(),
        },
        Message::QueryInfo,
        Message::Info(ScreenInfo {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            cursor_x: 960,
            cursor_y: 540,
        }),
        Message::InfoAck,
        Message::KeepAlive,
        Message::Noop,
        Message::Enter {
            x: 1,
            y: 540,
            sequence: 1,
            mask: 0,
            for_screensaver: None,
        },
        Message::Leave,
        Message::GrabClipboard {
            id: ClipboardId::General,
            sequence: 7,
        },
        Message::ScreenSaver { on: true },
        Message::ResetOptions,
        Message::KeyDown {
            key: 0x61,
            mask: 0x0004,
            button: 0x1E,
        },
        Message::KeyRepeat {
            key: 0x61,
            mask: 0,
            count: 4,
            button: 0x1E,
        },
        Message::KeyUp {
            key: 0x61,
            mask: 0,
            button: 0x1E,
        },
        Message::MouseDown { button: 1 },
        Message::MouseMove { x: 100, y: 200 },
        Message::MouseRelMove { dx: -4, dy: 9 },
        Message::MouseWheel { dx: 0, dy: 120 },
        Message::MouseUp { button: 1 },
        Message::SetOptions {
            options: vec![(0x4842_5254, 3000)],
        },
        Message::FileTransfer {
            mark: 1,
            data: b"42".to_vec(),
        },
        Message::DragInfo {
            count: 1,
            data: b"file.txt".to_vec(),
        },
        Message::ErrorIncompatible {
            version: PROTOCOL_VERSION,
        },
        Message::Close,
    ];

    let (mut tx, mut rx) = pipe().await;
    for message in &messages {
        send(&mut tx, message, PROTOCOL_VERSION).await;
    }
    for expected in &messages {
        let got = receive(&mut rx, PROTOCOL_VERSION).await;
        assert_eq!(&got, expected);
    }
}

#[tokio::test]
async fn test_handshake_exchange_in_wire_order() {
    let (mut server, mut client) = pipe().await;

    // Server speaks first.
    send(
        &mut server,
        &Message::Hello {
            version: PROTOCOL_VERSION,
        },
        PROTOCOL_VERSION,
    )
    .await;
    let hello = receive(&mut client, PROTOCOL_VERSION).await;
    let Message::Hello { version } = hello else {
        panic!("expected hello, got {hello:?}");
    };
    assert_eq!(version, PROTOCOL_VERSION);

    send(
        &mut client,
        &Message::HelloBack {
            version: PROTOCOL_VERSION,
            name: "laptop".to_string(),
        },
        PROTOCOL_VERSION,
    )
    .await;
    send(&mut server, &Message::QueryInfo, PROTOCOL_VERSION).await;
    send(
        &mut client,
        &Message::Info(ScreenInfo {
            x: 0,
            y: 0,
            width: 2560,
            height: 1440,
            cursor_x: 0,
            cursor_y: 0,
        }),
        PROTOCOL_VERSION,
    )
    .await;
    send(&mut server, &Message::InfoAck, PROTOCOL_VERSION).await;

    let back = receive(&mut server, PROTOCOL_VERSION).await;
    assert!(matches!(back, Message::HelloBack { .. }));
    let info = receive(&mut server, PROTOCOL_VERSION).await;
    assert!(matches!(info, Message::Info(_)));

    assert!(matches!(
        receive(&mut client, PROTOCOL_VERSION).await,
        Message::QueryInfo
    ));
    assert!(matches!(
        receive(&mut client, PROTOCOL_VERSION).await,
        Message::InfoAck
    ));
}

#[tokio::test]
async fn test_clipboard_transfer_reassembles_across_the_stream() {
    let (mut server, mut client) = pipe().await;

    let mut data = ClipboardData::new();
    data.add(
        edgehop_core::clipboard::ClipboardFormat::Text,
        b"hello".to_vec(),
    );
    let marshalled = data.marshal();

    for message in chunk_clipboard(ClipboardId::General, 7, &marshalled) {
        send(&mut server, &message, PROTOCOL_VERSION).await;
    }

    let mut assembler = ChunkAssembler::new();
    let mut blob = None;
    loop {
        let Message::ClipboardData { mark, data, .. } =
            receive(&mut client, PROTOCOL_VERSION).await
        else {
            panic!("expected clipboard chunk");
        };
        if let Some(done) = assembler.accept(mark, &data).unwrap() {
            blob = Some(done);
            break;
        }
    }

    let restored = ClipboardData::unmarshal(&blob.unwrap()).unwrap();
    assert_eq!(restored, data);
}

#[test]
fn test_enter_sequence_bytes_sit_after_coordinates() {
    // Wire layout: CINN, x(2), y(2), sequence(4), mask(2).
    let payload = Message::Enter {
        x: 0x0102,
        y: 0x0304,
        sequence: 0x0506_0708,
        mask: 0x090A,
        for_screensaver: None,
    }
    .encode(PROTOCOL_VERSION)
    .unwrap();
    assert_eq!(&payload[..4], b"CINN");
    assert_eq!(&payload[4..6], &[0x01, 0x02]);
    assert_eq!(&payload[6..8], &[0x03, 0x04]);
    assert_eq!(&payload[8..12], &[0x05, 0x06, 0x07, 0x08]);
    assert_eq!(&payload[12..14], &[0x09, 0x0A]);
}
