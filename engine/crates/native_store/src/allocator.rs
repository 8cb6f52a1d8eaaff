use crate::types::NativeHandle;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    generation: u32,
    occupied: bool,
}

/// Hands out arena slots for native objects.
///
/// A slot's generation is bumped each time it is reused, so a handle kept by a
/// script object after its native was released never resolves to the new
/// occupant.
#[derive(Debug, Clone, Default)]
pub struct HandleAllocator {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> NativeHandle {
        match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.occupied = true;
                NativeHandle::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    occupied: true,
                });
                NativeHandle::new(index, 0)
            }
        }
    }

    /// Frees the slot behind `handle`. False if the handle was already stale.
    pub fn release(&mut self, handle: NativeHandle) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.slots[handle.index as usize].occupied = false;
        self.vacant.push(handle.index);
        true
    }

    pub fn is_live(&self, handle: NativeHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.occupied && slot.generation == handle.generation)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.occupied).count()
    }

    /// Vacate every slot. Generations survive, so handles issued before the
    /// reset stay dead.
    pub fn reset(&mut self) {
        self.vacant.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            slot.occupied = false;
            self.vacant.push(index as u32);
        }
    }
}
