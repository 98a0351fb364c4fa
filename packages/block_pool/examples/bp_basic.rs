//! Basic usage example for `BlockPool`.
//!
//! This example shows the separate storage and value lifecycle of pooled slots,
//! and how released slots are handed out again.

use block_pool::BlockPool;

fn main() {
    // Small blocks make the block growth visible with only a few items.
    let mut pool = BlockPool::<u64>::builder()
        .block_size(64)
        .build()
        .expect("64 bytes hold more than two u64 slots");

    println!(
        "Created BlockPool with {}-byte blocks of {} slots each",
        pool.block_size(),
        pool.slots_per_block()
    );

    // Allocate raw storage and place values into it in two steps.
    let slot = pool.allocate().expect("the system allocator supplies the first block");

    // SAFETY: The slot was just allocated and is empty.
    let item = unsafe { pool.construct(slot, 0xdead_beef) };

    // SAFETY: The value was constructed above.
    let value = unsafe { *item.as_ref() };
    println!("Constructed value: {value:#x}");

    // Insert more values than fit into a single block.
    let items = (0..10_u64)
        .map(|index| pool.insert(index).expect("the system allocator supplies more blocks"))
        .collect::<Vec<_>>();

    println!("Inserted {} more items", items.len());

    // Release one slot and observe that it is the next one handed out.
    let released = items[4];

    // SAFETY: The item came from this pool and is not used after this.
    unsafe {
        pool.remove(released);
    }

    let reused = pool.insert(40).expect("a released slot is available");
    println!("Released slot reused: {}", reused == released);

    // SAFETY: The value was constructed above and is not used after this.
    unsafe {
        pool.remove(item);
    }

    // Values of u64 own no resources, so the remaining ones can simply be
    // left in place. Dropping the pool returns all blocks to the system.
    drop(pool);

    println!("Pool dropped, all blocks released");
}
