//! Round-trip of oversize records through the UDP writer/reader pair.

use daq_core::encoding::{Encoding, EncodingErrors};
use daq_core::reader::Reader;
use daq_core::readers::UdpReader;
use daq_core::writer::Writer;
use daq_core::writers::UdpWriter;
use das_record::Record;
use std::time::Duration;

fn reader_on_free_port() -> (UdpReader, u16) {
    let reader = UdpReader::new(
        0,
        "",
        None,
        4096,
        Encoding::Utf8,
        EncodingErrors::Ignore,
    )
    .unwrap();
    let port = reader.local_port().unwrap();
    (reader, port)
}

async fn read_text(reader: &mut UdpReader) -> String {
    let record = tokio::time::timeout(Duration::from_secs(5), reader.read())
        .await
        .expect("datagram arrives")
        .unwrap()
        .unwrap();
    record.as_text().unwrap().to_owned()
}

#[tokio::test]
async fn oversize_record_reassembles_exactly() {
    let (mut reader, port) = reader_on_free_port();
    // 16-byte datagrams with the 10-byte marker leave 6 payload bytes per
    // fragment; 22 bytes split into 6+6+6+4.
    let mut writer = UdpWriter::new("127.0.0.1", port, 2, 5, None)
        .unwrap()
        .with_max_datagram(16)
        .unwrap();

    let payload = "abcdefghijklmnopqrstuv";
    writer.write(Record::Text(payload.into())).await.unwrap();
    assert_eq!(read_text(&mut reader).await, payload);
}

#[tokio::test]
async fn fragmented_and_whole_records_interleave_cleanly() {
    let (mut reader, port) = reader_on_free_port();
    let mut writer = UdpWriter::new("127.0.0.1", port, 2, 5, None)
        .unwrap()
        .with_max_datagram(16)
        .unwrap();

    let long = "x".repeat(100);
    writer.write(Record::Text(long.clone())).await.unwrap();
    writer.write(Record::Text("short".into())).await.unwrap();

    assert_eq!(read_text(&mut reader).await, long);
    assert_eq!(read_text(&mut reader).await, "short");
}

#[tokio::test]
async fn round_trip_of_arbitrary_byte_strings() {
    let (mut reader, port) = reader_on_free_port();
    let mut writer = UdpWriter::new("127.0.0.1", port, 2, 5, None)
        .unwrap()
        .with_max_datagram(32)
        .unwrap();

    for length in [0usize, 1, 21, 22, 23, 66, 500] {
        let payload: String = ('a'..='z').cycle().take(length).collect();
        writer.write(Record::Text(payload.clone())).await.unwrap();
        if length == 0 {
            // Empty records are no-ops on the write side.
            continue;
        }
        assert_eq!(read_text(&mut reader).await, payload, "length {length}");
    }
}

#[tokio::test]
async fn small_records_require_no_fragmentation() {
    let (mut reader, port) = reader_on_free_port();
    let mut writer = UdpWriter::new("127.0.0.1", port, 2, 5, Some("\n")).unwrap();
    writer.write(Record::Text("plain".into())).await.unwrap();
    assert_eq!(read_text(&mut reader).await, "plain\n");
}
