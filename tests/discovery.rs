//! Segment lifecycle and cross-handle discovery tests.
//!
//! Every test builds a uniquely named segment, attaches second handles the
//! way an unrelated process would, and unlinks on the way out.

use rtipc::{Array, Error, Queue, Segment, SegmentOptions, Stack, Table, UnlinkPolicy};

fn unique(tag: &str) -> String {
    format!("/rtipc_disc_{}_{tag}", std::process::id())
}

#[test]
fn create_open_round_trip_header_image() {
    let name = unique("roundtrip");
    let opts = SegmentOptions::new(1 << 20).table_capacity(16);
    let seg = Segment::create(&name, &opts).unwrap();

    // A second handle maps the same object and reads the table header.
    let second = Segment::open(&name).unwrap();
    assert_eq!(second.capacity(), 1 << 20);

    let mut head = [0u8; 16];
    // SAFETY: the mapping is at least 16 bytes (validated at open).
    unsafe { std::ptr::copy_nonoverlapping(second.base(), head.as_mut_ptr(), 16) };
    assert_eq!(
        u32::from_le_bytes(head[0..4].try_into().unwrap()),
        0x5A49_504D,
        "magic"
    );
    assert_eq!(u32::from_le_bytes(head[4..8].try_into().unwrap()), 1, "version");
    assert_eq!(
        u32::from_le_bytes(head[8..12].try_into().unwrap()),
        0,
        "entry count"
    );
    // 16 + 16 * 40 = 656.
    assert_eq!(
        u32::from_le_bytes(head[12..16].try_into().unwrap()),
        656,
        "next free"
    );

    let table = Table::attach(&second).unwrap();
    assert_eq!(table.capacity(), 16);
    assert_eq!(table.count(), 0);
    assert_eq!(table.next_free(), 656);

    drop(second);
    Segment::unlink(&name).unwrap();
    assert!(matches!(Segment::open(&name), Err(Error::NotFound)));
    drop(seg);
}

#[test]
fn cross_handle_entry_discovery() {
    let name = unique("entries");
    let seg = Segment::create(&name, &SegmentOptions::new(1 << 20).table_capacity(16)).unwrap();
    let table = Table::attach(&seg).unwrap();
    table.add("alpha", 40).unwrap();
    table.add("beta", 80).unwrap();

    // The observer maps independently and discovers both regions.
    let observer = Segment::open(&name).unwrap();
    let observer_table = Table::attach(&observer).unwrap();

    let entries: Vec<_> = observer_table.iter().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "alpha");
    assert_eq!(entries[0].size, 40);
    assert_eq!(entries[1].name, "beta");
    assert_eq!(entries[1].size, 80);
    assert!(entries[0].offset < entries[1].offset);
    assert_eq!(entries[1].offset, entries[0].offset + 40);

    let (alpha_off, alpha_size) = observer_table.find("alpha").unwrap();
    assert_eq!((alpha_off, alpha_size), (entries[0].offset, 40));

    Segment::unlink(&name).unwrap();
}

#[test]
fn cross_handle_structure_traffic() {
    let name = unique("traffic");
    let seg = Segment::create(&name, &SegmentOptions::new(1 << 20).table_capacity(16)).unwrap();
    let table = Table::attach(&seg).unwrap();

    let q = Queue::create(&table, "q", 4, 8).unwrap();
    let st = Stack::create(&table, "s", 4, 8).unwrap();
    let arr = Array::create(&table, "a", 4, 8).unwrap();

    q.push(&11u32.to_le_bytes()).unwrap();
    st.push(&22u32.to_le_bytes()).unwrap();
    arr.set(3, &33u32.to_le_bytes()).unwrap();

    // The consumer side opens everything by name with the agreed layouts.
    let other = Segment::open(&name).unwrap();
    let other_table = Table::attach(&other).unwrap();
    let q2 = Queue::open(&other_table, "q", 4).unwrap();
    let st2 = Stack::open(&other_table, "s", 4).unwrap();
    let arr2 = Array::open(&other_table, "a", 4).unwrap();

    let mut out = [0u8; 4];
    q2.pop(&mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 11);
    st2.pop(&mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 22);
    arr2.get(3, &mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 33);

    // Traffic flows the other way too.
    q2.push(&44u32.to_le_bytes()).unwrap();
    q.pop(&mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 44);

    Segment::unlink(&name).unwrap();
}

#[test]
fn unlink_policies() {
    // Manual: the object outlives every handle.
    let manual = unique("manual");
    {
        let _seg = Segment::create(&manual, &SegmentOptions::new(1 << 16)).unwrap();
    }
    assert!(Segment::open(&manual).is_ok());
    Segment::unlink(&manual).unwrap();

    // OnCreatorDrop: the creator's drop takes the name with it.
    let auto = unique("auto");
    {
        let _seg = Segment::create(
            &auto,
            &SegmentOptions::new(1 << 16).unlink_policy(UnlinkPolicy::OnCreatorDrop),
        )
        .unwrap();
    }
    assert!(matches!(Segment::open(&auto), Err(Error::NotFound)));
}

#[test]
fn existing_mappings_survive_unlink() {
    let name = unique("survive");
    let seg = Segment::create(&name, &SegmentOptions::new(1 << 16).table_capacity(8)).unwrap();
    let table = Table::attach(&seg).unwrap();
    let q = Queue::create(&table, "q", 4, 4).unwrap();
    q.push(&7u32.to_le_bytes()).unwrap();

    Segment::unlink(&name).unwrap();

    // The name is gone but the mapping still works.
    assert!(matches!(Segment::open(&name), Err(Error::NotFound)));
    let mut out = [0u8; 4];
    q.pop(&mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 7);
}

#[test]
fn default_table_capacity_applies() {
    let name = unique("defaults");
    let seg = Segment::create(&name, &SegmentOptions::new(1 << 20)).unwrap();
    let table = Table::attach(&seg).unwrap();
    assert_eq!(table.capacity(), rtipc::DEFAULT_TABLE_CAPACITY);
    Segment::unlink(&name).unwrap();
}
