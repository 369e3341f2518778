//! The steady-state step (push, snapshot, process) must not touch the heap.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use polyguitar_core::config::PipelineConfig;
use polyguitar_core::notes::NoteEvent;
use polyguitar_core::pipeline::Pipeline;
use polyguitar_core::ring_buffer::ring_buffer;

struct CountingAllocator;

thread_local! {
    static TRACKING: Cell<bool> = const { Cell::new(false) };
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

fn record() {
    let _ = TRACKING.try_with(|tracking| {
        if tracking.get() {
            ALLOCATIONS.with(|count| count.set(count.get() + 1));
        }
    });
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record();
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record();
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record();
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

/// Counts heap allocations made by `f` on the current thread.
fn allocations_in(f: impl FnOnce()) -> usize {
    ALLOCATIONS.with(|count| count.set(0));
    TRACKING.with(|tracking| tracking.set(true));
    f();
    TRACKING.with(|tracking| tracking.set(false));
    ALLOCATIONS.with(|count| count.get())
}

/// Two decaying dyads, the second struck halfway through.
fn chord_frames(count: usize) -> Vec<Vec<f32>> {
    let first = [(110.0_f64, 0.3_f64), (164.81, 0.25)];
    let second = [(146.83_f64, 0.3_f64), (196.0, 0.25)];
    let change = count / 2 * 128;
    (0..count)
        .map(|index| {
            (index * 128..(index + 1) * 128)
                .map(|n| {
                    let (voices, start) = if n < change { (&first, 0) } else { (&second, change) };
                    let t = n as f64 / 48_000.0;
                    let age = (n - start) as f64 / 48_000.0;
                    voices
                        .iter()
                        .map(|&(frequency, amplitude)| {
                            amplitude
                                * (-age / 0.3).exp()
                                * (2.0 * std::f64::consts::PI * frequency * t).sin()
                        })
                        .sum::<f64>() as f32
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_step_does_not_allocate() {
        let config = PipelineConfig::default();
        let (mut producer, mut consumer) = ring_buffer(&config);
        let mut pipeline = Pipeline::new(config).unwrap();
        let mut events: Vec<NoteEvent> = Vec::with_capacity(256);
        let frames = chord_frames(400);

        // Warm-up outside the measured region.
        for frame in &frames[..20] {
            producer.push(frame).unwrap();
            if let Some(window) = consumer.snapshot() {
                events.clear();
                pipeline.process(window, &mut events);
            }
        }

        let mut total_events = 0;
        let allocations = allocations_in(|| {
            for frame in &frames[20..] {
                producer.push(frame).unwrap();
                if let Some(window) = consumer.snapshot() {
                    events.clear();
                    pipeline.process(window, &mut events);
                    total_events += events.len();
                }
            }
        });

        assert_eq!(allocations, 0);
        assert_eq!(pipeline.steps(), 400);
        assert!(total_events > 0);
    }
}
