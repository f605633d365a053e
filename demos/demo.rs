//! Producer/consumer walkthrough over one shared segment.
//!
//! Both sides attach their own mapping by name, exactly as two unrelated
//! processes would; threads stand in for processes so the demo is
//! self-contained. Run with `cargo run --example demo`.

use rtipc::{Error, Queue, Segment, SegmentOptions, Table, UnlinkPolicy};

const EVENTS: u64 = 100_000;

fn main() -> rtipc::Result<()> {
    let name = format!("/rtipc_demo_{}", std::process::id());

    let seg = Segment::create(
        &name,
        &SegmentOptions::new(1 << 20).unlink_policy(UnlinkPolicy::OnCreatorDrop),
    )?;
    let table = Table::attach(&seg)?;
    Queue::create(&table, "events", 8, 256)?;
    println!("segment {name}: {} bytes, queue 'events' ready", seg.capacity());

    let consumer = {
        let name = name.clone();
        std::thread::spawn(move || -> rtipc::Result<u64> {
            let seg = Segment::open(&name)?;
            let table = Table::attach(&seg)?;
            let queue = Queue::open(&table, "events", 8)?;

            let mut sum = 0u64;
            let mut received = 0u64;
            let mut out = [0u8; 8];
            while received < EVENTS {
                match queue.pop(&mut out) {
                    Ok(()) => {
                        sum = sum.wrapping_add(u64::from_le_bytes(out));
                        received += 1;
                    }
                    Err(Error::Empty) => std::hint::spin_loop(),
                    Err(e) => return Err(e),
                }
            }
            Ok(sum)
        })
    };

    let producer = {
        let name = name.clone();
        std::thread::spawn(move || -> rtipc::Result<u64> {
            let seg = Segment::open(&name)?;
            let table = Table::attach(&seg)?;
            let queue = Queue::open(&table, "events", 8)?;

            let mut sum = 0u64;
            for i in 0..EVENTS {
                loop {
                    match queue.push(&i.to_le_bytes()) {
                        Ok(()) => break,
                        Err(Error::Full) => std::hint::spin_loop(),
                        Err(e) => return Err(e),
                    }
                }
                sum = sum.wrapping_add(i);
            }
            Ok(sum)
        })
    };

    let sent = producer.join().expect("producer panicked")?;
    let received = consumer.join().expect("consumer panicked")?;
    println!("sent checksum     {sent:#x}");
    println!("received checksum {received:#x}");
    assert_eq!(sent, received);
    println!("ok: {EVENTS} events round-tripped");

    Ok(())
}
