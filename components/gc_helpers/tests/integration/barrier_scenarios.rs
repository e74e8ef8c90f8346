use gc_helpers::write_barrier::{CARD_DIRTY, CARD_SIZE};
use gc_helpers::{Address, BarrierState, Boundaries, CardTable};
use std::sync::Arc;

const HEAP_BASE: usize = 0x4000_0000;
const HEAP_SIZE: usize = 64 * CARD_SIZE;
const EPH_LOW: usize = HEAP_BASE + 32 * CARD_SIZE;
const EPH_HIGH: usize = HEAP_BASE + HEAP_SIZE;

fn barriers() -> BarrierState {
    let state = BarrierState::new();
    state.boundaries().update(Boundaries {
        lowest_address: Address::new(HEAP_BASE),
        highest_address: Address::new(EPH_HIGH),
        ephemeral_low: Address::new(EPH_LOW),
        ephemeral_high: Address::new(EPH_HIGH),
    });
    state.install_card_table(CardTable::with_default_card_size(
        Address::new(HEAP_BASE),
        HEAP_SIZE,
    ));
    state
}

fn table_bytes(state: &BarrierState) -> Vec<Option<u8>> {
    state
        .with_card_table(|t| (0..t.num_cards()).map(|i| t.card_byte(i)).collect())
        .unwrap()
}

#[test]
fn test_remarking_dirty_card_is_unobservable() {
    let state = barriers();
    let object = Address::new(HEAP_BASE + 0x100);
    let slot = object.add(8);
    let young = Address::new(EPH_LOW + 0x40);

    assert!(state.record_store(object, slot, young));
    let once = table_bytes(&state);
    assert!(state.record_store(object, slot, young));
    assert_eq!(table_bytes(&state), once);
    assert_eq!(once[0], Some(CARD_DIRTY));
}

#[test]
fn test_ephemeral_bounds_are_half_open() {
    let state = barriers();
    let old = Address::new(HEAP_BASE + 0x200);

    assert!(state.needs_card_mark(old, Address::new(EPH_LOW)));
    assert!(!state.needs_card_mark(old, Address::new(EPH_HIGH)));
    assert!(state.needs_card_mark(old, Address::new(EPH_HIGH - 8)));
}

#[test]
fn test_young_destination_never_marks() {
    let state = barriers();
    let young_obj = Address::new(EPH_LOW);
    assert!(!state.record_store(young_obj, young_obj.add(8), Address::new(EPH_LOW + 0x80)));
    assert_eq!(state.with_card_table(|t| t.num_dirty_cards()), Some(0));
}

#[test]
fn test_concurrent_markers_agree() {
    let state = Arc::new(barriers());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for card in 0..32 {
                    let slot = Address::new(HEAP_BASE + card * CARD_SIZE + 16);
                    state.record_store(slot, slot, Address::new(EPH_LOW));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let dirty = state.with_card_table(|t| t.dirty_cards()).unwrap();
    assert_eq!(dirty, (0..32).collect::<Vec<_>>());
}

#[test]
fn test_collector_moves_ephemeral_range() {
    let state = barriers();
    let object = Address::new(HEAP_BASE + 0x100);
    let value = Address::new(EPH_LOW - CARD_SIZE);
    assert!(!state.needs_card_mark(object, value));

    state
        .boundaries()
        .set_ephemeral_range(Address::new(EPH_LOW - 2 * CARD_SIZE), Address::new(EPH_HIGH));
    assert!(state.needs_card_mark(object, value));
}
