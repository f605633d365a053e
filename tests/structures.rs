//! Structure semantics exercised through the public API, with the reader
//! and writer on separate mappings where it matters.

use rtipc::{Array, Error, Queue, Segment, SegmentOptions, Stack, Table};

fn unique(tag: &str) -> String {
    format!("/rtipc_struct_{}_{tag}", std::process::id())
}

fn setup(tag: &str, table_capacity: u32) -> (String, Segment) {
    let name = unique(tag);
    let seg = Segment::create(
        &name,
        &SegmentOptions::new(1 << 20).table_capacity(table_capacity),
    )
    .unwrap();
    (name, seg)
}

#[test]
fn array_set_get_across_mappings() {
    let (name, seg) = setup("array", 8);
    let table = Table::attach(&seg).unwrap();
    let arr = Array::create(&table, "a", 4, 3).unwrap();

    arr.set(0, &1u32.to_le_bytes()).unwrap();
    arr.set(1, &2u32.to_le_bytes()).unwrap();
    arr.set(2, &3u32.to_le_bytes()).unwrap();

    let reader_seg = Segment::open(&name).unwrap();
    let reader_table = Table::attach(&reader_seg).unwrap();
    let reader = Array::open(&reader_table, "a", 4).unwrap();

    let mut out = [0u8; 4];
    for (i, expected) in [(0u32, 1u32), (1, 2), (2, 3)] {
        reader.get(i, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes(out), expected);
    }
    assert!(matches!(
        reader.set(3, &4u32.to_le_bytes()),
        Err(Error::OutOfRange)
    ));

    Segment::unlink(&name).unwrap();
}

#[test]
fn queue_fifo_with_interleaved_refill() {
    let (name, seg) = setup("fifo", 8);
    let table = Table::attach(&seg).unwrap();
    let q = Queue::create(&table, "q", 4, 4).unwrap();

    let push = |v: u32| q.push(&v.to_le_bytes());
    let pop = || -> Result<u32, Error> {
        let mut out = [0u8; 4];
        q.pop(&mut out)?;
        Ok(u32::from_le_bytes(out))
    };

    push(1).unwrap();
    push(2).unwrap();
    push(3).unwrap();
    push(4).unwrap();
    assert!(matches!(push(5), Err(Error::Full)));

    assert_eq!(pop().unwrap(), 1);
    assert_eq!(pop().unwrap(), 2);
    push(5).unwrap();
    assert_eq!(pop().unwrap(), 3);
    assert_eq!(pop().unwrap(), 4);
    assert_eq!(pop().unwrap(), 5);
    assert!(matches!(pop(), Err(Error::Empty)));

    Segment::unlink(&name).unwrap();
}

#[test]
fn stack_lifo_with_interleaved_refill() {
    let (name, seg) = setup("lifo", 8);
    let table = Table::attach(&seg).unwrap();
    let st = Stack::create(&table, "s", 4, 3).unwrap();

    let push = |v: u32| st.push(&v.to_le_bytes());
    let pop = || -> Result<u32, Error> {
        let mut out = [0u8; 4];
        st.pop(&mut out)?;
        Ok(u32::from_le_bytes(out))
    };

    push(10).unwrap();
    push(20).unwrap();
    push(30).unwrap();
    assert!(matches!(push(40), Err(Error::Full)));

    assert_eq!(pop().unwrap(), 30);
    assert_eq!(pop().unwrap(), 20);
    push(40).unwrap();
    assert_eq!(pop().unwrap(), 40);
    assert_eq!(pop().unwrap(), 10);
    assert!(matches!(pop(), Err(Error::Empty)));

    Segment::unlink(&name).unwrap();
}

#[test]
fn queue_round_trips_arbitrary_bytes() {
    let (name, seg) = setup("bytes", 8);
    let table = Table::attach(&seg).unwrap();
    let q = Queue::create(&table, "q", 16, 4).unwrap();

    let patterns: [[u8; 16]; 3] = [
        [0x00; 16],
        [0xFF; 16],
        [
            0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04, 0x80, 0x7F, 0x55, 0xAA, 0x10, 0x20,
            0x30, 0x40,
        ],
    ];
    for p in &patterns {
        q.push(p).unwrap();
    }
    let mut out = [0u8; 16];
    for p in &patterns {
        q.pop(&mut out).unwrap();
        assert_eq!(&out, p, "byte pattern did not round-trip exactly");
    }

    Segment::unlink(&name).unwrap();
}

#[test]
fn table_exhaustion_boundary() {
    let (name, seg) = setup("exhaust", 2);
    let table = Table::attach(&seg).unwrap();

    table.add("one", 8).unwrap();
    // One slot left: exactly one more create succeeds.
    Queue::create(&table, "two", 4, 4).unwrap();
    assert!(matches!(
        Queue::create(&table, "three", 4, 4),
        Err(Error::TableFull)
    ));

    Segment::unlink(&name).unwrap();
}

#[test]
fn allocation_exhaustion_boundary() {
    let name = unique("oom");
    // Small segment: table region (16 + 2*40 = 96) plus a bit of room.
    let seg = Segment::create(&name, &SegmentOptions::new(256).table_capacity(2)).unwrap();
    let table = Table::attach(&seg).unwrap();

    // 256 - 96 = 160 bytes of allocatable space.
    table.add("fits", 160).unwrap();
    assert!(matches!(table.add("overflow", 8), Err(Error::OutOfMemory)));

    Segment::unlink(&name).unwrap();
}

#[test]
fn structure_names_are_independent_of_kind() {
    // The table does not record types; opening a queue region as an array
    // is caught only by the header geometry, not by name.
    let (name, seg) = setup("kinds", 8);
    let table = Table::attach(&seg).unwrap();
    Queue::create(&table, "q", 4, 4).unwrap();

    // Same name, wrong assumed element size: rejected by the header check.
    assert!(matches!(
        Queue::open(&table, "q", 8),
        Err(Error::InvalidArgument(_))
    ));

    Segment::unlink(&name).unwrap();
}

#[test]
fn removed_name_allows_fresh_structure() {
    let (name, seg) = setup("reuse", 8);
    let table = Table::attach(&seg).unwrap();

    let q = Queue::create(&table, "scratch", 4, 4).unwrap();
    q.push(&1u32.to_le_bytes()).unwrap();
    table.remove("scratch").unwrap();
    assert!(matches!(
        Queue::open(&table, "scratch", 4),
        Err(Error::NotFound)
    ));

    // The fresh structure gets its own region; the old view keeps working
    // against the orphaned one.
    let fresh = Queue::create(&table, "scratch", 4, 4).unwrap();
    assert!(fresh.is_empty());
    assert_eq!(q.len(), 1);

    Segment::unlink(&name).unwrap();
}
