mod common;

use common::SimNode;
use mcush_protocol::{McushError, SdoClient};
use proptest::prelude::*;
use std::time::Duration;

const NODE: u8 = 5;

fn client(node: SimNode) -> SdoClient<SimNode> {
    SdoClient::new(node)
        .with_timeout(Duration::from_millis(30))
        .with_poll_interval(Duration::ZERO)
}

/// Toggle bits of the segment requests the client sent, in order
fn request_toggles(node: &SimNode, ccs: u8) -> Vec<u8> {
    node.sent
        .iter()
        .filter(|f| f.id() == 0x605 && f.data()[0] & 0xE0 == ccs)
        .map(|f| f.data()[0] & 0x10)
        .collect()
}

#[test]
fn expedited_write_then_read() {
    let mut sdo = client(SimNode::new(NODE));
    sdo.write_object(NODE, 0x2100, 1, &[0x01, 0x02]).unwrap();
    assert_eq!(sdo.bus().sent[0].data()[0], 0x2B);
    assert_eq!(sdo.bus().objects[&(0x2100, 1)], vec![0x01, 0x02]);
    assert_eq!(sdo.read_object(NODE, 0x2100, 1).unwrap(), vec![0x01, 0x02]);
}

#[test]
fn typed_values() {
    let mut sdo = client(SimNode::new(NODE));
    sdo.write_value(NODE, 0x2000, 0, -1234i32).unwrap();
    sdo.write_value(NODE, 0x2001, 0, 2.5f32).unwrap();
    assert_eq!(sdo.read_value::<i32>(NODE, 0x2000, 0).unwrap(), -1234);
    assert_eq!(sdo.read_value::<f32>(NODE, 0x2001, 0).unwrap(), 2.5);
    // too short for the requested type
    sdo.write_value(NODE, 0x2002, 0, 7u8).unwrap();
    assert!(matches!(
        sdo.read_value::<u32>(NODE, 0x2002, 0),
        Err(McushError::Parse(_))
    ));
}

#[test]
fn segmented_read_alternates_toggle() {
    let payload: Vec<u8> = (0..30).collect();
    let node = SimNode::new(NODE).with_object(0x1008, 0, &payload);
    let mut sdo = client(node);
    assert_eq!(sdo.read_object(NODE, 0x1008, 0).unwrap(), payload);
    assert_eq!(request_toggles(sdo.bus(), 0x60), vec![0x00, 0x10, 0x00, 0x10, 0x00]);
}

#[test]
fn segmented_write_alternates_toggle() {
    let payload = b"Shell Lab CANopen node".to_vec();
    let mut sdo = client(SimNode::new(NODE));
    sdo.write_object(NODE, 0x2200, 3, &payload).unwrap();
    assert_eq!(sdo.bus().objects[&(0x2200, 3)], payload);
    let sent = &sdo.bus().sent;
    assert_eq!(sent[0].data()[0], 0x21);
    assert_eq!(&sent[0].data()[4..], &(payload.len() as u32).to_le_bytes());
    assert_eq!(request_toggles(sdo.bus(), 0x00), vec![0x00, 0x10, 0x00, 0x10]);
    // 22 bytes: 7 + 7 + 7 + 1, last segment has 6 unused bytes and no-more
    assert_eq!(sent.last().unwrap().data()[0], 0x10 | (6 << 1) | 0x01);
}

#[test]
fn unknown_size_upload_ends_at_no_more() {
    let payload: Vec<u8> = (0..10).collect();
    let mut node = SimNode::new(NODE).with_object(0x1009, 0, &payload);
    node.hide_size = true;
    let mut sdo = client(node);
    assert_eq!(sdo.read_object(NODE, 0x1009, 0).unwrap(), payload);
}

#[test]
fn foreign_traffic_and_duplicates_are_skipped() {
    let payload: Vec<u8> = (100..120).collect();
    let mut node = SimNode::new(NODE).with_object(0x100A, 0, &payload);
    node.noise = true;
    node.duplicate = true;
    let mut sdo = client(node);
    assert_eq!(sdo.read_object(NODE, 0x100A, 0).unwrap(), payload);
    sdo.write_object(NODE, 0x100B, 0, &payload).unwrap();
    assert_eq!(sdo.bus().objects[&(0x100B, 0)], payload);
}

#[test]
fn non_alternating_peer_times_out() {
    let payload: Vec<u8> = (0..16).collect();
    let mut node = SimNode::new(NODE).with_object(0x1008, 0, &payload);
    node.stuck_toggle = true;
    let mut sdo = client(node);
    match sdo.read_object(NODE, 0x1008, 0).unwrap_err() {
        McushError::SdoTimeout { node, index, stage, .. } => {
            assert_eq!((node, index), (NODE, 0x1008));
            assert_eq!(stage, "upload segment");
        }
        other => panic!("unexpected {other:?}"),
    }
    let err = sdo.write_object(NODE, 0x2000, 0, &payload).unwrap_err();
    assert!(matches!(err, McushError::SdoTimeout { .. }));
}

#[test]
fn missing_object_aborts_on_initiate() {
    let mut sdo = client(SimNode::new(NODE));
    match sdo.read_object(NODE, 0x6000, 2).unwrap_err() {
        McushError::SdoAbort { code, description, subindex, .. } => {
            assert_eq!(code, 0x0602_0000);
            assert_eq!(subindex, 2);
            assert!(description.contains("does not exist"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn abort_during_segment() {
    let payload: Vec<u8> = (0..12).collect();
    let mut node = SimNode::new(NODE).with_object(0x1008, 0, &payload);
    node.abort_segment = Some(0x0800_0020);
    let mut sdo = client(node);
    assert!(matches!(
        sdo.read_object(NODE, 0x1008, 0),
        Err(McushError::SdoAbort { code: 0x0800_0020, .. })
    ));

    sdo.bus_mut().abort_segment = Some(0x0601_0002);
    assert!(matches!(
        sdo.write_object(NODE, 0x1008, 0, &payload),
        Err(McushError::SdoAbort { code: 0x0601_0002, .. })
    ));
}

#[test]
fn silent_node_times_out_at_initiate() {
    let mut sdo = client(SimNode::new(NODE));
    let err = sdo.read_object(NODE + 1, 0x1000, 0).unwrap_err();
    match err {
        McushError::SdoTimeout { stage, .. } => assert_eq!(stage, "upload initiate"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn node_id_is_validated() {
    let mut sdo = client(SimNode::new(NODE));
    assert!(matches!(
        sdo.read_object(0, 0x1000, 0),
        Err(McushError::InvalidNodeId(0))
    ));
    assert!(sdo.bus().sent.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn expedited_round_trip(data in prop::collection::vec(any::<u8>(), 1..=4)) {
        let mut sdo = client(SimNode::new(NODE));
        sdo.write_object(NODE, 0x2000, 1, &data).unwrap();
        let control = sdo.bus().sent[0].data()[0];
        prop_assert_eq!(control, 0x23 | (((4 - data.len()) as u8) << 2));
        prop_assert_eq!(sdo.read_object(NODE, 0x2000, 1).unwrap(), data);
    }

    #[test]
    fn segmented_round_trip(data in prop::collection::vec(any::<u8>(), 5..200)) {
        let mut sdo = client(SimNode::new(NODE));
        sdo.write_object(NODE, 0x2001, 0, &data).unwrap();
        prop_assert_eq!(sdo.read_object(NODE, 0x2001, 0).unwrap(), data.clone());
        let segments = (data.len() + 6) / 7;
        let toggles = request_toggles(sdo.bus(), 0x60);
        prop_assert_eq!(toggles.len(), segments);
        for (i, t) in toggles.iter().enumerate() {
            prop_assert_eq!(*t, if i % 2 == 0 { 0x00 } else { 0x10 });
        }
    }
}
