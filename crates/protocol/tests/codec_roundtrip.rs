//! Property test for the codec round-trip law: for every valid message,
//! `decode(encode(m)) == m`.

use std::io::Cursor;

use proptest::prelude::*;
use protocol::{decode, encode, Message};

fn ascii_field() -> impl Strategy<Value = String> {
    "[ -~]{0,64}"
}

fn any_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (
            ascii_field(),
            ascii_field(),
            ascii_field(),
            ascii_field(),
            ascii_field(),
            ascii_field()
        )
            .prop_map(
                |(origin_path, size, mtime, file_server, local_destination, locate_limit)| {
                    Message::RequestFile {
                        origin_path,
                        size,
                        mtime,
                        file_server,
                        local_destination,
                        locate_limit,
                    }
                }
            ),
        (ascii_field(), ascii_field(), ascii_field(), ascii_field()).prop_map(
            |(origin_path, size, mtime, locate_limit)| Message::GetLocations {
                origin_path,
                size,
                mtime,
                locate_limit,
            }
        ),
        ascii_field().prop_map(|local_path| Message::CheckLocal { local_path }),
        (ascii_field(), ascii_field())
            .prop_map(|(host, remote_path)| Message::CheckRemote { host, remote_path }),
        Just(Message::FileOk),
        Just(Message::FileNotOk),
        (ascii_field(), ascii_field())
            .prop_map(|(host, remote_path)| Message::CopyFromNode { host, remote_path }),
        Just(Message::CopyFromServer),
        ascii_field().prop_map(|resulting_local_path| Message::CopyOk { resulting_local_path }),
        Just(Message::CopyFailed),
        Just(Message::Fallback),
        (ascii_field(), ascii_field(), ascii_field(), ascii_field()).prop_map(
            |(origin_path, size, mtime, local_path)| Message::HaveFile {
                origin_path,
                size,
                mtime,
                local_path,
            }
        ),
        (ascii_field(), ascii_field(), ascii_field(), ascii_field()).prop_map(
            |(origin_path, size, mtime, local_path)| Message::DeletedCopy {
                origin_path,
                size,
                mtime,
                local_path,
            }
        ),
        ascii_field().prop_map(|wait_seconds| Message::Wait { wait_seconds }),
        (ascii_field(), ascii_field(), ascii_field(), ascii_field()).prop_map(
            |(origin_path, size, mtime, destination_file_server)| Message::RegisterCopy {
                origin_path,
                size,
                mtime,
                destination_file_server,
            }
        ),
        Just(Message::Exit),
        Just(Message::KeepAlive),
        ascii_field().prop_map(|local_destination| Message::IsActive { local_destination }),
        Just(Message::Ping),
    ]
}

proptest! {
    #[test]
    fn roundtrips_every_message_kind(msg in any_message()) {
        let mut buf = Vec::new();
        encode(&mut buf, &msg).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = decode(&mut cursor).unwrap().unwrap();
        prop_assert_eq!(decoded, msg);
    }
}
