// Synchronization primitives and frame-slot rotation
//
// One FrameSync per frame in flight: an "image acquired" semaphore, a
// "render complete" semaphore, and a CPU-waitable fence marking the
// slot's prior submission. The fence wait is the only blocking point
// on the submission path and bounds in-flight frames to the slot count.

use super::device::RenderDevice;
use super::error::Result;
use ash::vk;
use std::sync::Arc;

/// Per-slot synchronization objects. The fence starts signaled so the
/// first wait on a fresh slot passes immediately.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    device: Arc<RenderDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<RenderDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight: device.device.create_fence(&fence_info, None)?,
                device: device.clone(),
            })
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Lifecycle of one frame slot within a loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Submitted,
    PresentPending,
}

/// CPU-side mirror of the per-slot fence gating: tracks which slot is
/// active (`frame mod N`) and refuses to reuse a slot whose prior
/// submission has not been confirmed complete.
pub struct FrameSchedule {
    states: Vec<SlotState>,
    current: usize,
}

impl FrameSchedule {
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            states: vec![SlotState::Idle; slots],
            current: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Record that the current slot's fence wait completed: any prior
    /// submission through this slot is done.
    pub fn reclaim(&mut self) {
        self.states[self.current] = SlotState::Idle;
    }

    /// Start a frame on the current slot. Returns false if the slot is
    /// still tied to an unconfirmed submission, in which case the
    /// caller must not proceed past the wait step.
    pub fn begin(&mut self) -> bool {
        if self.states[self.current] != SlotState::Idle {
            return false;
        }
        self.states[self.current] = SlotState::Acquiring;
        true
    }

    /// Roll the current slot back to idle after a failed acquire. The
    /// fence was never reset, so the slot remains immediately usable.
    pub fn abort(&mut self) {
        self.states[self.current] = SlotState::Idle;
    }

    pub fn submitted(&mut self) {
        debug_assert_eq!(self.states[self.current], SlotState::Acquiring);
        self.states[self.current] = SlotState::Submitted;
    }

    pub fn presented(&mut self) {
        debug_assert_eq!(self.states[self.current], SlotState::Submitted);
        self.states[self.current] = SlotState::PresentPending;
    }

    /// Rotate to slot `(current + 1) mod N`.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.states.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_one_frame(schedule: &mut FrameSchedule) {
        schedule.reclaim();
        assert!(schedule.begin());
        schedule.submitted();
        schedule.presented();
        schedule.advance();
    }

    #[test]
    fn slots_rotate_zero_one_zero_one() {
        let mut schedule = FrameSchedule::new(2);
        let mut seen = Vec::new();

        for _ in 0..4 {
            seen.push(schedule.current());
            run_one_frame(&mut schedule);
        }

        assert_eq!(seen, vec![0, 1, 0, 1]);
    }

    #[test]
    fn slot_cannot_be_reused_before_fence_confirmation() {
        let mut schedule = FrameSchedule::new(2);

        // Frame 0 through slot 0, fence never observed afterwards.
        schedule.reclaim();
        assert!(schedule.begin());
        schedule.submitted();
        schedule.presented();
        schedule.advance();

        // Frame 1 through slot 1.
        run_one_frame(&mut schedule);

        // Back on slot 0: without the fence wait (reclaim) the slot
        // must refuse to begin.
        assert_eq!(schedule.current(), 0);
        assert_eq!(schedule.state(0), SlotState::PresentPending);
        assert!(!schedule.begin());

        // The fence signal unblocks it.
        schedule.reclaim();
        assert!(schedule.begin());
    }

    #[test]
    fn aborted_acquire_leaves_slot_idle_and_unrotated() {
        let mut schedule = FrameSchedule::new(2);

        schedule.reclaim();
        assert!(schedule.begin());
        schedule.abort();

        assert_eq!(schedule.current(), 0);
        assert_eq!(schedule.state(0), SlotState::Idle);
        assert!(schedule.begin());
    }

    #[test]
    fn single_slot_schedule_is_valid() {
        let mut schedule = FrameSchedule::new(0);
        assert_eq!(schedule.slot_count(), 1);

        run_one_frame(&mut schedule);
        assert_eq!(schedule.current(), 0);
    }
}
