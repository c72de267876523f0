// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use snn_engine::run_simulation;
use snn_engine::test_helpers::start_test;
use snn_models::memory::{
    FetchOrigin, MemoryClient, MemoryCommand, MemoryConfig, MemoryReply, SharedMemory,
};
use snn_models::weight_cache::MergeRange;
use snn_track::entity::Entity;
use std::rc::Rc;

fn memory_config(delay_ticks: u64) -> MemoryConfig {
    MemoryConfig {
        base_address: 0x1000,
        capacity_bytes: 4096,
        delay_ticks,
    }
}

#[test]
fn untimed_write_then_peek() {
    let engine = start_test(file!());
    let memory =
        SharedMemory::new_and_register(&engine, engine.top(), "memory", memory_config(4)).unwrap();

    memory.write_untimed(0x1000, &[1, 2, 3, 4]).unwrap();
    assert_eq!(memory.peek(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(memory.peek(0x1002, 2).unwrap(), vec![3, 4]);
}

#[test]
fn out_of_range_access_rejected() {
    let engine = start_test(file!());
    let memory =
        SharedMemory::new_and_register(&engine, engine.top(), "memory", memory_config(4)).unwrap();

    assert!(memory.write_untimed(0xfff, &[0]).is_err());
    assert!(memory.write_untimed(0x1000 + 4096, &[0]).is_err());
    assert!(memory.peek(0x1000, 4097).is_err());
}

#[test]
fn read_reply_visible_after_delay() {
    let engine = start_test(file!());
    let memory =
        SharedMemory::new_and_register(&engine, engine.top(), "memory", memory_config(4)).unwrap();
    memory.write_untimed(0x1000, &[9, 8, 7, 6]).unwrap();

    let port = memory.connect();
    let id = port
        .send(
            MemoryCommand::Read {
                addr: 0x1000,
                size: 4,
            },
            10,
        )
        .unwrap();

    // Nothing before the due cycle.
    assert!(port.drain_ready(13).is_empty());
    assert_eq!(port.pending(), 1);

    let replies = port.drain_ready(14);
    assert_eq!(replies.len(), 1);
    match &replies[0] {
        MemoryReply::ReadResp { id: reply_id, bytes } => {
            assert_eq!(*reply_id, id);
            assert_eq!(*bytes, vec![9, 8, 7, 6]);
        }
        MemoryReply::WriteAck { .. } => panic!("expected a read response"),
    }
    assert_eq!(port.pending(), 0);
}

#[test]
fn untimed_writes_seal_at_run() {
    let mut engine = start_test(file!());
    let memory =
        SharedMemory::new_and_register(&engine, engine.top(), "memory", memory_config(1)).unwrap();

    memory.write_untimed(0x1000, &[1]).unwrap();
    run_simulation!(engine);

    // The init window closed when the run started.
    assert!(memory.write_untimed(0x1000, &[2]).is_err());
}

#[test]
fn non_posted_write_is_acknowledged() {
    let mut engine = start_test(file!());
    let memory =
        SharedMemory::new_and_register(&engine, engine.top(), "memory", memory_config(3)).unwrap();
    let port = memory.connect();

    // Timed writes only exist after init.
    assert!(port
        .send(
            MemoryCommand::Write {
                addr: 0x1000,
                bytes: vec![5],
                posted: false,
            },
            0,
        )
        .is_err());
    run_simulation!(engine);

    let id = port
        .send(
            MemoryCommand::Write {
                addr: 0x1000,
                bytes: vec![5, 6],
                posted: false,
            },
            20,
        )
        .unwrap();
    assert!(port.drain_ready(22).is_empty());
    let replies = port.drain_ready(23);
    assert!(matches!(replies.as_slice(), [MemoryReply::WriteAck { id: ack }] if *ack == id));
    assert_eq!(memory.peek(0x1000, 2).unwrap(), vec![5, 6]);

    // A posted write completes silently.
    port.send(
        MemoryCommand::Write {
            addr: 0x1002,
            bytes: vec![7],
            posted: true,
        },
        30,
    )
    .unwrap();
    assert!(port.drain_ready(40).is_empty());
    assert_eq!(memory.peek(0x1002, 1).unwrap(), vec![7]);
}

fn client(entity: &Rc<Entity>, memory: &Rc<SharedMemory>, max_outstanding: usize) -> MemoryClient {
    MemoryClient::new(entity.clone(), memory.connect(), max_outstanding)
}

#[test]
fn fetch_coalesces_in_flight_ranges() {
    let engine = start_test(file!());
    let top = engine.top().clone();
    let memory =
        SharedMemory::new_and_register(&engine, &top, "memory", memory_config(2)).unwrap();
    let mut client = client(&top, &memory, 8);

    let range = MergeRange {
        pre: 0,
        post_start: 0,
        count: 16,
    };
    assert!(client
        .fetch(0x1000, range, FetchOrigin::CacheFill, 0)
        .unwrap());
    // The same range never has two concurrent fetches.
    assert!(!client
        .fetch(0x1000, range, FetchOrigin::CacheFill, 0)
        .unwrap());
    assert_eq!(client.outstanding(), 1);
    assert_eq!(client.requests_issued(), 1);

    // Once the reply lands the range can be fetched again.
    let filled = client.drain(2);
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].1.len(), 16);
    assert!(client
        .fetch(0x1000, range, FetchOrigin::CacheFill, 2)
        .unwrap());
}

#[test]
fn fetch_respects_outstanding_limit() {
    let engine = start_test(file!());
    let top = engine.top().clone();
    let memory =
        SharedMemory::new_and_register(&engine, &top, "memory", memory_config(2)).unwrap();
    let mut client = client(&top, &memory, 2);

    for pre in 0..2 {
        let range = MergeRange {
            pre,
            post_start: 0,
            count: 4,
        };
        assert!(client
            .fetch(0x1000 + u64::from(pre) * 16, range, FetchOrigin::CacheFill, 0)
            .unwrap());
    }

    // The third concurrent fetch is refused.
    let range = MergeRange {
        pre: 2,
        post_start: 0,
        count: 4,
    };
    assert!(!client
        .fetch(0x1040, range, FetchOrigin::CacheFill, 0)
        .unwrap());
    assert_eq!(client.outstanding(), 2);
}

#[test]
fn fetched_values_decode_as_f32() {
    let engine = start_test(file!());
    let top = engine.top().clone();
    let memory =
        SharedMemory::new_and_register(&engine, &top, "memory", memory_config(1)).unwrap();

    let mut bytes = Vec::new();
    for value in [0.25f32, -1.5, 3.0] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    memory.write_untimed(0x1000, &bytes).unwrap();

    let mut client = client(&top, &memory, 4);
    let range = MergeRange {
        pre: 0,
        post_start: 0,
        count: 3,
    };
    client
        .fetch(0x1000, range, FetchOrigin::CacheFill, 0)
        .unwrap();

    let filled = client.drain(1);
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].1, vec![0.25, -1.5, 3.0]);
}
